use rand::RngCore;

/// 8 random bytes rendered as 16 hex characters; the request-id format.
pub fn random_id() -> String {
    random_id_sized(8)
}

pub fn random_id_sized(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_lengths() {
        assert_eq!(random_id().len(), 16);
        assert_eq!(random_id_sized(16).len(), 32);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(random_id(), random_id());
    }
}
