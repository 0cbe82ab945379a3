//! Integration tests spanning `triode-core` and `triode-infra`

#[cfg(test)]
mod chain_integration;

#[cfg(test)]
mod engine_integration;
