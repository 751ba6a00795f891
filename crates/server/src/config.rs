use std::net::{IpAddr, SocketAddr};

use clap::Parser;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100_000_000;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "gallery",
    version,
    about = "Image gallery served from an object storage bucket"
)]
pub struct Config {
    /// Bucket to serve, e.g. mem://, file:///srv/images, s3://photos?region=eu-west-1, gs://photos
    #[arg(long, env = "BUCKET_URL")]
    pub bucket_url: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Largest accepted upload, in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .trim_matches(|c| c == '[' || c == ']')
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen host {}: {e}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_only_bucket_is_given() {
        let config = Config::try_parse_from(["gallery", "--bucket-url", "mem://"]).unwrap();
        assert_eq!(config.bucket_url, "mem://");
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(!config.verbose);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "gallery",
            "--bucket-url",
            "file:///tmp/images",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--max-upload-bytes",
            "1024",
            "-v",
        ])
        .unwrap();
        assert_eq!(config.listen_addr().unwrap().to_string(), "127.0.0.1:9000");
        assert_eq!(config.max_upload_bytes, 1024);
        assert!(config.verbose);
    }

    #[test]
    fn ipv6_hosts_are_accepted() {
        for host in ["::", "[::1]"] {
            let config = Config::try_parse_from([
                "gallery",
                "--bucket-url",
                "mem://",
                "--host",
                host,
                "--port",
                "8080",
            ])
            .unwrap();
            let addr = config.listen_addr().unwrap();
            assert!(addr.is_ipv6(), "{host}");
            assert_eq!(addr.port(), 8080);
        }
    }
}
