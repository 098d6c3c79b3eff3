mod config;
mod domain;
mod kms;
