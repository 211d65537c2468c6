//! Bid-for-visibility posts
//!
//! A post is addressed by `[post_seed, author, target]`, so one author has at
//! most one post per target. The bid lands in a treasury; everything above
//! the treasury's rent-exempt floor is split 45 / 10 / 45, the last share
//! absorbing rounding.

use shade_core::{Address, RecordParseError};
use thiserror::Error;

use crate::records::{discriminator, ByteReader, DISCRIMINATOR_SIZE};

/// 0.007 SOL
pub const MIN_BID: u64 = 7_000_000;
/// Rent-exempt minimum kept in the treasury account
pub const TREASURY_MIN_BALANCE: u64 = 890_880;
pub const MAX_TARGET_LEN: usize = 64;
pub const MAX_POST_CONTENT_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostError {
    #[error("bid {bid} below minimum {MIN_BID}")]
    BidTooLow { bid: u64 },
    #[error("target too long: {len} bytes (max {MAX_TARGET_LEN})")]
    TargetTooLong { len: usize },
    #[error("content too long: {len} bytes (max {MAX_POST_CONTENT_LEN})")]
    ContentTooLong { len: usize },
}

pub fn validate_post(target: &str, content: &str, bid: u64) -> Result<(), PostError> {
    if bid < MIN_BID {
        return Err(PostError::BidTooLow { bid });
    }
    if target.len() > MAX_TARGET_LEN {
        return Err(PostError::TargetTooLong { len: target.len() });
    }
    if content.len() > MAX_POST_CONTENT_LEN {
        return Err(PostError::ContentTooLong {
            len: content.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevenueSplit {
    pub first: u64,
    pub second: u64,
    pub third: u64,
}

impl RevenueSplit {
    pub fn total(&self) -> u64 {
        self.first + self.second + self.third
    }
}

/// Distribution of a treasury balance; `None` while it is still at or
/// below the floor.
pub fn revenue_split(treasury_balance: u64) -> Option<RevenueSplit> {
    let distributable = treasury_balance.saturating_sub(TREASURY_MIN_BALANCE);
    if distributable == 0 {
        return None;
    }
    let first = (distributable as u128 * 45 / 100) as u64;
    let second = (distributable as u128 * 10 / 100) as u64;
    Some(RevenueSplit {
        first,
        second,
        third: distributable - first - second,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub author: Address,
    pub target: String,
    pub content: String,
    pub bid: u64,
    pub timestamp: i64,
    pub bump: u8,
}

impl Post {
    pub const NAME: &'static str = "Post";
    pub const SIZE: usize =
        DISCRIMINATOR_SIZE + 32 + 4 + MAX_TARGET_LEN + 4 + MAX_POST_CONTENT_LEN + 8 + 8 + 1;

    pub fn decode(data: &[u8]) -> Result<Self, RecordParseError> {
        let mut r = ByteReader::new(Self::NAME, data);
        r.expect_discriminator(discriminator(Self::NAME))?;
        let author = Address::new(r.read_array()?);
        let target = read_string(&mut r, MAX_TARGET_LEN)?;
        let content = read_string(&mut r, MAX_POST_CONTENT_LEN)?;
        Ok(Self {
            author,
            target,
            content,
            bid: r.read_u64()?,
            timestamp: r.read_i64()?,
            bump: r.read_u8()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&discriminator(Self::NAME));
        out.extend_from_slice(self.author.as_bytes());
        for s in [&self.target, &self.content] {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        out.extend_from_slice(&self.bid.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.push(self.bump);
        if out.len() < Self::SIZE {
            out.resize(Self::SIZE, 0);
        }
        out
    }
}

fn read_string(r: &mut ByteReader<'_>, max: usize) -> Result<String, RecordParseError> {
    let bytes = r.read_prefixed(max)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| RecordParseError::new(Post::NAME, "string field is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size() {
        assert_eq!(Post::SIZE, 641);
    }

    #[test]
    fn test_validation() {
        assert!(validate_post("t", "c", MIN_BID).is_ok());
        assert_eq!(
            validate_post("t", "c", MIN_BID - 1),
            Err(PostError::BidTooLow { bid: MIN_BID - 1 })
        );
        assert!(matches!(
            validate_post(&"t".repeat(65), "c", MIN_BID),
            Err(PostError::TargetTooLong { len: 65 })
        ));
        assert!(matches!(
            validate_post("t", &"c".repeat(513), MIN_BID),
            Err(PostError::ContentTooLong { len: 513 })
        ));
    }

    #[test]
    fn test_split_below_floor() {
        assert_eq!(revenue_split(TREASURY_MIN_BALANCE), None);
        assert_eq!(revenue_split(0), None);
    }

    #[test]
    fn test_split_shares() {
        let split = revenue_split(TREASURY_MIN_BALANCE + MIN_BID).unwrap();
        assert_eq!(split.first, 3_150_000);
        assert_eq!(split.second, 700_000);
        assert_eq!(split.third, 3_150_000);
        assert_eq!(split.total(), MIN_BID);
    }

    #[test]
    fn test_split_rounding_goes_to_third() {
        let split = revenue_split(TREASURY_MIN_BALANCE + 7).unwrap();
        assert_eq!(split.first, 3);
        assert_eq!(split.second, 0);
        assert_eq!(split.third, 4);
    }

    #[test]
    fn test_post_roundtrip_and_bad_utf8() {
        let post = Post {
            author: Address::new([5u8; 32]),
            target: "general".into(),
            content: "first!".into(),
            bid: MIN_BID,
            timestamp: 1_700_000_000,
            bump: 250,
        };
        let mut bytes = post.encode();
        assert_eq!(bytes.len(), Post::SIZE);
        assert_eq!(Post::decode(&bytes).unwrap(), post);

        // first byte of the target string
        bytes[8 + 32 + 4] = 0xFF;
        assert!(Post::decode(&bytes).is_err());
    }
}
