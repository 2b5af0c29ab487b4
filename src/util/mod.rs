pub mod env;
pub mod telemetry;

/// Compares two strings without short-circuiting on the first mismatched byte, so the time taken
/// doesn't leak how much of a token was guessed correctly.
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let diff = a
        .bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (l, r)| acc | std::hint::black_box(l ^ r));

    diff == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_const_time_cmp() {
        let expects = "internal_token";

        assert!(constant_time_cmp(expects, "internal_token"));
        assert!(!constant_time_cmp(expects, "__ternal_token"));
        assert!(!constant_time_cmp(expects, "internal_tok__"));
        assert!(!constant_time_cmp(expects, "internal_toke"));
        assert!(!constant_time_cmp(expects, "internal_token_"));
        assert!(!constant_time_cmp(expects, ""));
    }
}
