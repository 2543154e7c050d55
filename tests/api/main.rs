mod aliases;
mod api_keys;
mod health_check;
mod helpers;
mod mailboxes;
