mod cloudflare;
mod provider;

pub use cloudflare::CloudflareClient;
pub use provider::{DnsProvider, DnsRecord};
