//! Minimal AWS access: SigV4 request signing, STS role assumption and the
//! EC2 instance lookup.

pub mod ec2;
pub mod sigv4;
pub mod sts;

pub use ec2::Ec2InstanceDirectory;
pub use sigv4::SigV4Signer;
pub use sts::StsClient;
