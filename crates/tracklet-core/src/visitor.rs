//! Deterministic visitor display names and avatars.
//!
//! Both are derived from the client-held visitor id so repeat lookups always
//! produce the same identity, without storing anything personal.

const ADJECTIVES: &[&str] = &[
    "Happy", "Lucky", "Sunny", "Clever", "Brave", "Calm", "Eager", "Fancy", "Gentle", "Jolly",
];

const ANIMALS: &[&str] = &[
    "Panda", "Tiger", "Lion", "Eagle", "Dolphin", "Fox", "Wolf", "Bear", "Hawk", "Owl",
];

/// 32-bit string hash (djb2-style, wrapping) over UTF-16 code units, kept
/// compatible with the browser snippet's hash so server- and client-derived
/// names agree.
fn hash_id(id: &str) -> i32 {
    let mut hash: i32 = 0;
    for unit in id.encode_utf16() {
        hash = (unit as i32).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash));
    }
    hash
}

pub fn generate_visitor_name(id: &str) -> String {
    let hash = hash_id(id);
    let adjective = ADJECTIVES[hash.unsigned_abs() as usize % ADJECTIVES.len()];
    let animal = ANIMALS[(hash >> 5).unsigned_abs() as usize % ANIMALS.len()];
    format!("{adjective} {animal}")
}

pub fn generate_avatar_url(id: &str) -> String {
    format!("https://api.dicebear.com/7.x/pixel-art/svg?seed={id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_deterministic() {
        let a = generate_visitor_name("550e8400-e29b-41d4-a716-446655440000");
        let b = generate_visitor_name("550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(a, b);
    }

    #[test]
    fn name_is_adjective_animal() {
        let name = generate_visitor_name("some-visitor");
        let parts: Vec<&str> = name.split(' ').collect();
        assert_eq!(parts.len(), 2);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(ANIMALS.contains(&parts[1]));
    }

    #[test]
    fn different_ids_usually_differ() {
        assert_ne!(
            generate_visitor_name("visitor-a"),
            generate_visitor_name("visitor-b")
        );
    }

    #[test]
    fn avatar_embeds_seed() {
        assert!(generate_avatar_url("abc").ends_with("seed=abc"));
    }
}
