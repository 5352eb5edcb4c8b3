//! External balance sources

mod solana;

pub use solana::{LAMPORTS_PER_SOL, SolanaRpc, lamports_to_sol, validate_address};
