// Newline-delimited JSON command server and its wire types.

pub mod dto;
pub mod server;
