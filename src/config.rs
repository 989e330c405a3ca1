//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::auth::Credential;
use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const UPLOAD_DIR_NAME: &str = "uploads";
pub const AUTH_REALM: &str = "Authentication Required";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 10 * 1024 * 1024 * 1024;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-share", version = VERSION_INFO, about = "AxoShare file server")]
pub struct Args {
    #[arg(
        short = 'd',
        long,
        env = "AXO_ROOT_DIR",
        default_value = ".",
        help = "Directory to serve"
    )]
    pub root_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "AXO_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "AXO_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "AXO_AUTH_USER",
        requires = "auth_pass",
        help = "Basic auth username (auth disabled when unset)"
    )]
    pub auth_user: Option<String>,
    #[arg(
        long,
        env = "AXO_AUTH_PASS",
        requires = "auth_user",
        help = "Basic auth password"
    )]
    pub auth_pass: Option<String>,
    #[arg(
        long,
        env = "AXO_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Upload folder size limit in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
}

impl Args {
    /// 仅当用户名与密码均非空时启用认证。
    pub fn credential(&self) -> Option<Credential> {
        match (self.auth_user.as_deref(), self.auth_pass.as_deref()) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credential {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            _ => None,
        }
    }
}
