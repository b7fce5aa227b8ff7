pub mod token_authority;

pub use token_authority::{
    generate_token, generate_token_with, hash_token_for_index, TokenAuthority, AUTH_TOKEN_KEY,
    TOKEN_ALPHABET,
};
