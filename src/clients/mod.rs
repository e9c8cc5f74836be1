pub mod roster_client;
