use std::net::Ipv4Addr;

use async_trait::async_trait;

use crate::error::Result;

/// Read-only snapshot of the provider-side record, fetched fresh each cycle.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    pub record_type: String,
    pub content: String,
    pub ttl: u32,
}

impl DnsRecord {
    /// The published address, when the record content parses as IPv4.
    pub fn current_ip(&self) -> Option<Ipv4Addr> {
        self.content.parse().ok()
    }
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Locate the managed A record.
    ///
    /// Fails with [`Error::RecordNotFound`](crate::Error::RecordNotFound)
    /// when no record matches; the record is never auto-created.
    async fn fetch_record(&self) -> Result<DnsRecord>;

    /// Replace the record's address. Idempotent: repeating the call with the
    /// same address leaves provider state unchanged.
    async fn update_record(&self, record_id: &str, new_ip: Ipv4Addr) -> Result<()>;

    fn provider_name(&self) -> &'static str;
}
