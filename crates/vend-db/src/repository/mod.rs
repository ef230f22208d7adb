//! # Repository Module
//!
//! Database repository implementations for Vend.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  SqliteStore (vend-engine)                                             │
//! │       │                                                                 │
//! │       │  db.sales().append_line(&line)                                 │
//! │       ▼                                                                 │
//! │  SaleRepository                                                        │
//! │  ├── create_invoice / get_invoice / delete_invoice                     │
//! │  ├── append_line / remove_line / clear_lines                           │
//! │  ├── append_payment / remove_payment / replace_payment                 │
//! │  └── finalize                                                          │
//! │       │                                                                 │
//! │       │  SQL, one transaction per mutation                             │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`product::ProductRepository`] - Catalog reads (and seed inserts)
//! - [`promotion::PromotionRepository`] - Promotions and associations
//! - [`sale::SaleRepository`] - Invoices, line items and payments

pub mod product;
pub mod promotion;
pub mod sale;
