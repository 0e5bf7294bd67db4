pub mod audit_log;
pub mod credential_store;
pub mod request_signer;
pub mod storage;
pub mod token_refresh;
