pub mod bson_utils;
