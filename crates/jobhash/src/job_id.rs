use rand::RngCore;

/// A 128-bit job identifier with version-4 UUID bit layout.
///
/// JobId is a plain value: Copy, hashable, and usable as a map key.
/// Its canonical text form is 32 lowercase hex characters, unhyphenated,
/// which is easier to pass around in URLs than the hyphenated variants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId([u8; 16]);

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("job ID must be 32 unhyphenated hex characters (got length {0})")]
    Length(usize),
    #[error("job ID contains invalid character {0:?}")]
    Character(char),
}

impl JobId {
    /// Generate a fresh identifier from the OS random source, stamping the
    /// version nibble of octet 6 and the variant bits of octet 8.
    ///
    /// Fails only if the OS entropy source does, which callers treat as an
    /// internal error.
    pub fn new() -> Result<Self, rand::Error> {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.try_fill_bytes(&mut bytes)?;
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] | 0x40) & 0x7f;
        Ok(Self(bytes))
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Little-endian u32 over the first four octets.
    ///
    /// Both the store and the worker pool route on this prefix. The octets
    /// are uniformly random, so taking the prefix modulo any shard or pool
    /// size spreads load evenly.
    pub fn route_prefix(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::str::FromStr for JobId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(ParseError::Length(s.len()));
        }
        // Uppercase hex would decode, but the generator only ever emits
        // lowercase, so it's rejected along with everything else.
        if let Some(c) = s.chars().find(|c| !matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(ParseError::Character(c));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).expect("length and characters were validated");
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_version_and_variant_bits() {
        for _ in 0..100 {
            let id = JobId::new().unwrap();
            let bytes = id.as_bytes();
            assert_eq!(bytes[6] >> 4, 4, "version nibble of {id}");
            assert_eq!(bytes[8] & 0x40, 0x40, "variant bit 0x40 of {id}");
            assert_eq!(bytes[8] & 0x80, 0, "variant bit 0x80 of {id}");
        }
    }

    #[test]
    fn test_no_collisions() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(JobId::new().unwrap()));
        }
    }

    #[test]
    fn test_text_round_trip() {
        let id = JobId::new().unwrap();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert!(text.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        assert_eq!(text.parse::<JobId>().unwrap(), id);

        let id = JobId::from_bytes([
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x47, 0x08, //
            0x49, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10,
        ]);
        assert_eq!(id.to_string(), "0102030405064708490a0b0c0d0e0f10");
    }

    #[test]
    fn test_parse_rejections() {
        let case = |s: &str| s.parse::<JobId>().unwrap_err().to_string();

        insta::assert_snapshot!(
            case(""),
            @"job ID must be 32 unhyphenated hex characters (got length 0)");
        insta::assert_snapshot!(
            case(&"a".repeat(31)),
            @"job ID must be 32 unhyphenated hex characters (got length 31)");
        insta::assert_snapshot!(
            case(&"a".repeat(33)),
            @"job ID must be 32 unhyphenated hex characters (got length 33)");
        insta::assert_snapshot!(
            case(&"g".repeat(32)),
            @"job ID contains invalid character 'g'");
        insta::assert_snapshot!(
            case(&"A".repeat(32)),
            @"job ID contains invalid character 'A'");

        // The canonical hyphenated UUID form is 36 characters, rejected on
        // length before anything looks at the hyphens.
        assert!(matches!(
            "01020304-0506-4708-490a-0b0c0d0e0f10".parse::<JobId>(),
            Err(ParseError::Length(36))
        ));
        // A hyphen smuggled into a 32-character string is caught per-character.
        assert!(matches!(
            "01020304-0506470849-0a0b0c0d0e0f".parse::<JobId>(),
            Err(ParseError::Character('-'))
        ));
    }

    #[test]
    fn test_route_prefix_is_little_endian() {
        let id = JobId::from_bytes([
            0x78, 0x56, 0x34, 0x12, 0, 0, 0x40, 0, //
            0x40, 0, 0, 0, 0, 0, 0, 0,
        ]);
        assert_eq!(id.route_prefix(), 0x12345678);
    }
}
