pub mod aliases;
pub mod api_keys;
pub mod domains;
pub mod health_check;
pub mod mailboxes;

pub use aliases::{create_alias, delete_alias, list_aliases};
pub use api_keys::{create_api_key, delete_api_key, list_api_keys};
pub use domains::{
    create_domain, delete_domain, dns_records, get_domain, list_domains, rotate_dkim,
};
pub use health_check::health_check;
pub use mailboxes::{
    create_mailbox, delete_mailbox, get_mailbox, list_mailboxes, quota, update_password,
};
