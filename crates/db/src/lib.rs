pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use repositories::{
    Admission, AssignOutcome, BuyerRepository, MessageRepository, OfferRepository,
    ProvisioningRepository, RepositoryError, SqlBuyerRepository, SqlMessageRepository,
    SqlOfferRepository, SqlProvisioningRepository, SqlThreadRepository, ThreadBinding,
    ThreadRepository,
};
