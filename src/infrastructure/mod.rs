pub mod memory;
pub mod models;
pub mod order_repo;
pub mod outbox;
pub mod voucher_repo;

#[cfg(test)]
pub mod test_db;
