use rand::Rng;

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 8;

pub const DEFAULT_CODE_PREFIX: &str = "BST";

/// Issues customer-facing confirmation codes. Uniqueness is enforced by the
/// store, not here.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `<PREFIX>-XXXXXXXX` with eight random uppercase alphanumerics. Lookups
/// upper-case the requested code, so the prefix is upper-cased too.
#[derive(Debug, Clone)]
pub struct RandomCodes {
    prefix: String,
}

impl RandomCodes {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim().to_ascii_uppercase(),
        }
    }
}

impl Default for RandomCodes {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_PREFIX)
    }
}

impl CodeGenerator for RandomCodes {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let body: String = (0..CODE_LEN)
            .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
            .collect();
        format!("{}-{}", self.prefix, body)
    }
}
