use crypto::digest::Digest;
use crypto::md5::Md5;

/// Construct a String hex-encoded MD5 digest of the user, password, and salt
/// according to the PostgreSQL auth algorithm:
/// `"md5" || hex(md5(hex(md5(password || user)) || salt))`
pub fn hash_md5_password(user: &str, password: &str, salt: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.input_str(password);
    hasher.input_str(user);
    let mut pwd_hash = [0; 16];
    hasher.result(&mut pwd_hash);
    hasher.reset();
    hasher.input_str(&hex::encode(&pwd_hash[..]));
    hasher.input(salt);
    hasher.result(&mut pwd_hash);

    let mut result = String::with_capacity(32 + 3);
    result.push_str("md5");
    result.push_str(&hex::encode(&pwd_hash[..]));
    result
}
