//! Opaque identifier helpers.

use uuid::Uuid;

/// Generate a new opaque entity identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// First hex block of an identifier, used where a compact handle is needed
/// (vault credential keys, log context).
pub fn short_id(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }

    #[test]
    fn short_id_takes_first_block() {
        assert_eq!(short_id("123e4567-e89b-12d3-a456-426614174000"), "123e4567");
        assert_eq!(short_id("nodashes"), "nodashes");
    }
}
