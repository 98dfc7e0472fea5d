pub mod http;
pub mod router;
pub mod server;
pub mod state;
pub mod subsystems;

#[cfg(test)]
mod test_support;
