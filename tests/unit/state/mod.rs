pub mod test_key_set_cache;
