//! Typed AWS resource declarations that render to CloudFormation properties.

pub mod glue;
pub mod iam;
pub mod s3;

pub use glue::{Crawler, Database, S3Target};
pub use iam::{Effect, PolicyDocument, Role, Statement};
pub use s3::{Bucket, BucketName, EntropySource, NameError, SystemEntropy};
