pub mod test_jwks_source;
