// AWS acquirers

pub mod dynamodb;
pub mod s3;
