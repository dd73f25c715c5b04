mod client;
mod crypto;
mod env;

pub use client::ModuleClient;
pub use crypto::{decrypt, encrypt};
pub use env::EnvVars;

pub fn get_current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}
