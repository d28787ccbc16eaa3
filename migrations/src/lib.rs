pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_orders_table;
mod m20250301_000002_create_special_codes_table;
mod m20250301_000003_create_scheduled_reminders_table;
mod m20250301_000004_create_order_counters_table;
mod m20250301_000005_create_products_table;
mod m20250301_000006_create_notification_errors_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_orders_table::Migration),
            Box::new(m20250301_000002_create_special_codes_table::Migration),
            Box::new(m20250301_000003_create_scheduled_reminders_table::Migration),
            Box::new(m20250301_000004_create_order_counters_table::Migration),
            Box::new(m20250301_000005_create_products_table::Migration),
            Box::new(m20250301_000006_create_notification_errors_table::Migration),
        ]
    }
}
