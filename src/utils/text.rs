pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Final path segment after the last `/` or `\`.
pub fn last_path_segment(value: &str) -> &str {
    match value.rfind(&['/', '\\'][..]) {
        Some(idx) => &value[idx + 1..],
        None => value,
    }
}

pub fn random_token(len: usize) -> String {
    use rand::{distributions::Alphanumeric, Rng};
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect::<String>()
        .to_lowercase()
}
