use std::hash::{DefaultHasher, Hash, Hasher};

/// 描述结构体的内容 hash，用于日志和 debug name
pub fn content_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// f32 以 bit 的形式参与 hash 和比较
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct FloatBits(u32);
impl FloatBits {
    #[inline]
    pub fn get(self) -> f32 {
        f32::from_bits(self.0)
    }
}
impl From<f32> for FloatBits {
    fn from(value: f32) -> Self {
        Self(value.to_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Hash)]
    struct Desc {
        width: FloatBits,
        name: String,
    }

    #[test]
    fn test_same_content_same_hash() {
        let a = Desc {
            width: 1.5.into(),
            name: "a".to_string(),
        };
        let b = Desc {
            width: 1.5.into(),
            name: "a".to_string(),
        };
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_float_bits_round_trip() {
        let bits = FloatBits::from(0.25);
        assert_eq!(bits.get(), 0.25);
        assert_ne!(FloatBits::from(0.0), FloatBits::from(-0.0));
    }
}
