/// Id is the identifier of every durable DocRouter entity.
/// It's a fixed 12-byte payload represented as 24 characters of lowercase hex,
/// ordered so that identifiers sort roughly by creation time.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; 12]);

impl Id {
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 12]
    }
    pub fn zero() -> Self {
        Self([0u8; 12])
    }
    pub fn new(b: [u8; 12]) -> Self {
        Self(b)
    }
    pub fn from_hex<T: AsRef<[u8]>>(hex: T) -> Result<Self, hex::FromHexError> {
        let vec_bytes = hex::decode(hex)?;
        let exact: [u8; 12] = vec_bytes
            .as_slice()
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;

        Ok(Id(exact))
    }
}

impl std::str::FromStr for Id {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Id::from_hex(s)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl serde::Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        format!("{self}").serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let str_val = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        Id::from_hex(str_val.as_ref()).map_err(|err| D::Error::custom(format!("invalid id: {err}")))
    }
}

/// IdGenerator mints Ids from the wall clock, a per-process shard,
/// and a monotone sequence. Layout is:
/// 4 bytes unix seconds | 2 bytes shard | 2 bytes random | 4 bytes sequence.
/// The shard keeps concurrent processes from colliding; the sequence keeps a
/// single process from colliding within one second.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    shard: u16,
    seq: u32,
}

impl IdGenerator {
    pub fn new(shard: u16) -> Self {
        Self { shard, seq: 0 }
    }

    pub fn next(&mut self) -> Id {
        let seconds = chrono::Utc::now().timestamp() as u32;
        let entropy: u16 = rand::random();
        self.seq = self.seq.wrapping_add(1);

        let mut b = [0u8; 12];
        b[0..4].copy_from_slice(&seconds.to_be_bytes());
        b[4..6].copy_from_slice(&self.shard.to_be_bytes());
        b[6..8].copy_from_slice(&entropy.to_be_bytes());
        b[8..12].copy_from_slice(&self.seq.to_be_bytes());
        Id(b)
    }
}

/// RevisionKey names a prompt revision in queue payloads and result rows.
/// It's either a concrete revision Id, or the literal "default" denoting the
/// implicit schema-less default prompt.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RevisionKey {
    Concrete(Id),
    Default,
}

impl RevisionKey {
    pub const DEFAULT_LITERAL: &'static str = "default";

    pub fn is_default(&self) -> bool {
        matches!(self, RevisionKey::Default)
    }
}

impl std::fmt::Display for RevisionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevisionKey::Concrete(id) => write!(f, "{id}"),
            RevisionKey::Default => f.write_str(Self::DEFAULT_LITERAL),
        }
    }
}

impl std::str::FromStr for RevisionKey {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::DEFAULT_LITERAL {
            Ok(RevisionKey::Default)
        } else {
            Ok(RevisionKey::Concrete(Id::from_hex(s)?))
        }
    }
}

impl serde::Serialize for RevisionKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        format!("{self}").serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for RevisionKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let str_val = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        str_val
            .parse()
            .map_err(|err| D::Error::custom(format!("invalid revision key: {err}")))
    }
}

#[cfg(test)]
mod test {
    use super::{Id, IdGenerator, RevisionKey};

    #[test]
    fn test_id_hex_round_trip() {
        let id = Id::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c]);
        assert_eq!(id.to_string(), "0102030405060708090a0b0c");
        assert_eq!(Id::from_hex("0102030405060708090a0b0c").unwrap(), id);

        assert!(Id::from_hex("0102").is_err());
        assert!(Id::from_hex("zz02030405060708090a0b0c").is_err());
    }

    #[test]
    fn test_generated_ids_are_unique_and_ordered() {
        let mut gen = IdGenerator::new(42);
        let ids: Vec<Id> = (0..1000).map(|_| gen.next()).collect();

        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());

        // All ids minted within one second share a timestamp prefix.
        for id in &ids {
            assert_eq!(id.to_string().len(), 24);
        }
    }

    #[test]
    fn test_revision_key_round_trip() {
        assert_eq!(
            "default".parse::<RevisionKey>().unwrap(),
            RevisionKey::Default
        );
        let concrete: RevisionKey = "0102030405060708090a0b0c".parse().unwrap();
        assert_eq!(concrete.to_string(), "0102030405060708090a0b0c");
        assert_eq!(RevisionKey::Default.to_string(), "default");
        assert!("not-hex-nor-default".parse::<RevisionKey>().is_err());
    }
}
