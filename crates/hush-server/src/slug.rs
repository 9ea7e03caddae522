use rand::Rng;

const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Random share slug in the form `AbC-dEf-GhI`.
pub fn random_slug() -> String {
    let mut rng = rand::thread_rng();
    let mut group = || -> String {
        (0..3)
            .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
            .collect()
    };
    format!("{}-{}-{}", group(), group(), group())
}
