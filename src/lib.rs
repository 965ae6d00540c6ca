pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod asymmetric;
    pub mod legacy;
    pub mod signer;
    pub mod token;
    pub mod xmc;
}

pub mod models {
    pub mod session;
    pub mod user;
}

pub mod repositories {
    pub mod session;
    pub mod user;
}

pub mod services {
    pub mod auth;
    pub mod sweep;
}

pub mod handlers {
    pub mod envelope;
    pub mod login;
}

pub mod middleware_layer {
    pub mod client;
    pub mod compression;
    pub mod maintenance;
    pub mod sign;
}

pub mod validation {
    pub mod auth;
}
