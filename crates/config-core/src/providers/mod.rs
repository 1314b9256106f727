//! Crypto providers and the registry that makes them pluggable.

pub mod gpg;
pub mod kms;
pub mod password;
pub mod traits;

pub use traits::{
    available_flags, initialize_provider, provider_list, ArgValue, Argument, Constructor,
    CryptoProvider, ProviderArgs, Registration,
};
