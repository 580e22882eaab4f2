use rand::Rng;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Short random id for correlating log lines of one request.
pub fn make_short_random_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..ID_ALPHABET.len());
            ID_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_have_requested_length() {
        assert_eq!(make_short_random_id(8).len(), 8);
        assert!(make_short_random_id(8).chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
