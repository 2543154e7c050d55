pub mod domain_name;
pub mod local_part;
pub mod password;
pub mod records;
pub mod selector;
