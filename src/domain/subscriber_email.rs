use md5::Digest;
use md5::Md5;
use validator::ValidateEmail;

/// A parsed email address. Parsing happens once, at the boundary; everything
/// downstream (member lookup, tag addressing) can then rely on the value
/// being well-formed.
#[derive(Debug, Clone)]
pub struct SubscriberEmail(String);

impl SubscriberEmail {
    pub fn parse(email: String) -> Result<Self, String> {
        ValidateEmail::validate_email(&email)
            .then_some(Self(email.clone()))
            .ok_or(format!("Invalid email: {email:?}"))
    }

    /// The provider-side member id: the MD5 hex digest of the lowercased
    /// address. Doubles as the existence-check key and the path segment for
    /// tag operations, so it must never be derived from anything but the
    /// original (pre-obfuscation) address.
    pub fn member_hash(&self) -> String {
        hex::encode(Md5::digest(self.0.to_lowercase().as_bytes()))
    }
}

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str { &self.0 }
}
