use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Hash a password using Argon2id (19MB memory, 2 iterations, parallelism 1).
pub fn hash(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let params = Params::new(19 * 1024, 2, 1, None).map_err(|e| format!("Invalid params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| format!("Hashing failed: {e}"))
}

/// Verify a password against a PHC hash string.
pub fn verify(password: &str, hash: &str) -> Result<bool, String> {
    let parsed = PasswordHash::new(hash).map_err(|e| format!("Invalid hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Policy check; returns one message per violated rule.
pub fn policy_violations(password: &str, min_length: usize) -> Vec<String> {
    let mut problems = Vec::new();
    if password.chars().count() < min_length {
        problems.push(format!("Password must be at least {min_length} characters"));
    }
    if password.len() > 256 {
        problems.push("Password must be at most 256 bytes".to_string());
    }
    if !password.is_empty() && password.trim().is_empty() {
        problems.push("Password must not be only whitespace".to_string());
    }
    problems
}
