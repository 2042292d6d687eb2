mod resolver;

pub use resolver::IpResolver;
