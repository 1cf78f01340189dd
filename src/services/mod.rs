pub mod account_service;
pub use account_service::{
    AccessToken, AccountError, AccountService, Registration, UserAccount,
};

pub mod account_service_impl;
pub use account_service_impl::SeaOrmAccountService;
