pub mod logging;
pub mod request_token;
pub mod streamtest;
