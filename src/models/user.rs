/// Login credentials of a player account.
///
/// Game data lives elsewhere; this is only what login needs.
#[derive(Clone, Debug)]
pub struct UserCredential {
    /// The account's numeric id, never `0`.
    pub id: i64,
    /// The client-generated login key.
    pub login_key: String,
    /// Argon2 PHC string of the login password.
    pub password_hash: String,
}
