use rand::Rng;

/// 32 symbols: A-Z minus the lookalikes I and O, plus digits 2-9.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const CODE_LEN: usize = 6;
pub const MINT_ATTEMPTS: usize = 10;
pub const PRIVATE_PREFIX: &str = "PRV-";

#[derive(Debug)]
pub struct MintExhausted {
    pub attempts: usize,
}

impl std::fmt::Display for MintExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "could not mint a unique code after {} attempts",
            self.attempts
        )
    }
}

impl std::error::Error for MintExhausted {}

fn draw(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// One uniform 6-symbol code over the ambiguity-free alphabet.
#[allow(dead_code)]
pub fn random_code() -> String {
    draw(CODE_ALPHABET, CODE_LEN)
}

fn mint_from<F>(alphabet: &[u8], len: usize, mut taken: F) -> anyhow::Result<String>
where
    F: FnMut(&str) -> anyhow::Result<bool>,
{
    for _ in 0..MINT_ATTEMPTS {
        let code = draw(alphabet, len);
        if !taken(&code)? {
            return Ok(code);
        }
    }
    Err(MintExhausted {
        attempts: MINT_ATTEMPTS,
    }
    .into())
}

/// Draw codes until `taken` clears one, bounded at [`MINT_ATTEMPTS`] tries.
/// Collisions are vanishingly rare at 32^6 codes, so a bounded loop beats a
/// reservation scheme; exhaustion surfaces as [`MintExhausted`].
pub fn mint_unique<F>(taken: F) -> anyhow::Result<String>
where
    F: FnMut(&str) -> anyhow::Result<bool>,
{
    mint_from(CODE_ALPHABET, CODE_LEN, taken)
}

/// Renders a minted code as the student-facing private invitation string.
pub fn private_code_string(code: &str) -> String {
    format!("{}{}", PRIVATE_PREFIX, code)
}

/// Shape check for a private invitation code: `PRV-` plus exactly six
/// alphabet symbols. Callers reject on `None` without touching the store.
pub fn parse_private_code(input: &str) -> Option<&str> {
    let rest = input.strip_prefix(PRIVATE_PREFIX)?;
    if input.len() != PRIVATE_PREFIX.len() + CODE_LEN {
        return None;
    }
    if rest.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
        Some(rest)
    } else {
        None
    }
}
