// Database acquirers: each drives the vendor dump tool and captures its
// output as the artifact

pub mod mssql;
pub mod mysql;
pub mod postgres;

pub const SQL_MIME: &str = "application/sql";
