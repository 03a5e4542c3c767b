use plexus_core::{intrinsic, LogicalId, RemovalPolicy, Resource};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::{json, Value as Json};
use thiserror::Error;

/// Random bytes hashed into a bucket name suffix.
const ENTROPY_BYTES: usize = 32;
/// Hex characters kept from the digest.
pub const SUFFIX_LEN: usize = 6;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NameError {
    #[error("invalid bucket name '{name}': {reason}")]
    Invalid { name: String, reason: &'static str },
    #[error("system random source failed")]
    Entropy,
}

pub trait EntropySource {
    fn fill(&self, dest: &mut [u8]) -> Result<(), NameError>;
}

pub struct SystemEntropy(SystemRandom);

impl SystemEntropy {
    pub fn new() -> Self { Self(SystemRandom::new()) }
}

impl Default for SystemEntropy {
    fn default() -> Self { Self::new() }
}

impl EntropySource for SystemEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), NameError> {
        self.0.fill(dest).map_err(|_| NameError::Entropy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketName(String);

impl BucketName {
    pub fn fixed(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    /// `<prefix>-<suffix>` where the suffix is the first six hex characters of
    /// the SHA-256 of fresh random bytes.
    pub fn random_suffixed(prefix: &str, entropy: &dyn EntropySource) -> Result<Self, NameError> {
        Self::fixed(format!("{}-{}", prefix.trim_end_matches('-'), random_suffix(entropy)?))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

pub fn random_suffix(entropy: &dyn EntropySource) -> Result<String, NameError> {
    let mut bytes = [0u8; ENTROPY_BYTES];
    entropy.fill(&mut bytes)?;
    let sum = digest::digest(&digest::SHA256, &bytes);
    let mut hexed = hex::encode(sum.as_ref());
    hexed.truncate(SUFFIX_LEN);
    Ok(hexed)
}

fn validate(name: &str) -> Result<(), NameError> {
    let fail = |reason| Err(NameError::Invalid { name: name.to_string(), reason });
    if !(3..=63).contains(&name.len()) {
        return fail("length must be between 3 and 63");
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.') {
        return fail("use lowercase letters, digits, dots and hyphens only");
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return fail("must begin and end with a letter or digit");
    }
    if name.contains("..") {
        return fail("must not contain adjacent dots");
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Bucket {
    id: LogicalId,
    name: BucketName,
    versioned: bool,
    kms_key_id: Option<String>,
    removal: RemovalPolicy,
}

impl Bucket {
    /// Versioned, SSE-S3 encrypted, retained on stack deletion.
    pub fn new(id: LogicalId, name: BucketName) -> Self {
        Self { id, name, versioned: true, kms_key_id: None, removal: RemovalPolicy::Retain }
    }

    pub fn versioned(mut self, on: bool) -> Self { self.versioned = on; self }
    pub fn kms_key(mut self, key_id: impl Into<String>) -> Self { self.kms_key_id = Some(key_id.into()); self }
    pub fn removal(mut self, policy: RemovalPolicy) -> Self { self.removal = policy; self }

    pub fn name(&self) -> &BucketName { &self.name }
    pub fn arn(&self) -> Json { intrinsic::get_att(&self.id, "Arn") }
    pub fn name_ref(&self) -> Json { intrinsic::reference(&self.id) }
    pub fn objects_arn(&self) -> Json { intrinsic::join("", vec![self.arn(), json!("/*")]) }
    pub fn s3_url(&self) -> Json { intrinsic::join("", vec![json!("s3://"), self.name_ref(), json!("/")]) }
}

impl Resource for Bucket {
    fn id(&self) -> &LogicalId { &self.id }
    fn type_name(&self) -> &'static str { "AWS::S3::Bucket" }
    fn removal_policy(&self) -> Option<RemovalPolicy> { Some(self.removal) }

    fn properties(&self) -> Json {
        let by_default = match &self.kms_key_id {
            Some(kms) => json!({ "SSEAlgorithm": "aws:kms", "KMSMasterKeyID": kms }),
            None => json!({ "SSEAlgorithm": "AES256" }),
        };
        let mut props = json!({
            "BucketName": self.name.as_str(),
            "BucketEncryption": {
                "ServerSideEncryptionConfiguration": [ { "ServerSideEncryptionByDefault": by_default } ]
            }
        });
        if self.versioned {
            props["VersioningConfiguration"] = json!({ "Status": "Enabled" });
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u8);
    impl EntropySource for Fixed {
        fn fill(&self, dest: &mut [u8]) -> Result<(), NameError> { dest.fill(self.0); Ok(()) }
    }

    struct Broken;
    impl EntropySource for Broken {
        fn fill(&self, _: &mut [u8]) -> Result<(), NameError> { Err(NameError::Entropy) }
    }

    #[test]
    fn suffix_is_six_lowercase_hex_chars() {
        let s = random_suffix(&SystemEntropy::new()).unwrap();
        assert_eq!(s.len(), SUFFIX_LEN);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn suffix_is_the_truncated_sha256_of_the_entropy() {
        let expected = hex::encode(digest::digest(&digest::SHA256, &[0u8; ENTROPY_BYTES]).as_ref());
        assert_eq!(random_suffix(&Fixed(0)).unwrap(), &expected[..SUFFIX_LEN]);
        assert_ne!(random_suffix(&Fixed(0)).unwrap(), random_suffix(&Fixed(1)).unwrap());
    }

    #[test]
    fn random_name_keeps_prefix() {
        let name = BucketName::random_suffixed("plexus-training-data-lake", &Fixed(7)).unwrap();
        let (prefix, suffix) = name.as_str().rsplit_once('-').unwrap();
        assert_eq!(prefix, "plexus-training-data-lake");
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert_eq!(BucketName::random_suffixed("x", &Broken), Err(NameError::Entropy));
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(BucketName::fixed("plexus-training-data-lake").is_ok());
        for bad in ["ab", "Upper-Case", "-leading", "trailing.", "a..b", "under_score"] {
            assert!(BucketName::fixed(bad).is_err(), "{bad} accepted");
        }
        assert!(BucketName::fixed("a".repeat(64)).is_err());
    }

    #[test]
    fn renders_versioning_and_encryption() {
        let id = LogicalId::new("DataLakeBucket").unwrap();
        let bucket = Bucket::new(id, BucketName::fixed("plexus-training-data-lake").unwrap());
        let props = bucket.properties();
        assert_eq!(props["BucketName"], "plexus-training-data-lake");
        assert_eq!(props["VersioningConfiguration"]["Status"], "Enabled");
        assert_eq!(
            props["BucketEncryption"]["ServerSideEncryptionConfiguration"][0]["ServerSideEncryptionByDefault"]["SSEAlgorithm"],
            "AES256"
        );
        assert_eq!(bucket.removal_policy(), Some(RemovalPolicy::Retain));

        let plain = bucket.clone().versioned(false).kms_key("alias/lake").removal(RemovalPolicy::Destroy);
        let props = plain.properties();
        assert!(props.get("VersioningConfiguration").is_none());
        assert_eq!(
            props["BucketEncryption"]["ServerSideEncryptionConfiguration"][0]["ServerSideEncryptionByDefault"]["KMSMasterKeyID"],
            "alias/lake"
        );
        assert_eq!(plain.removal_policy(), Some(RemovalPolicy::Destroy));
    }
}
