pub mod json_sent_link_repository;
pub mod mock_store;
pub mod sent_link_repository;
