use std::io;

use everelay_store::StoreError;
use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
pub enum RelayError {
    #[snafu(display("failed to create data directory: {source}"))]
    DataDir {
        source: io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to open store: {source}"))]
    Store {
        source: StoreError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to bind listener: {source}"))]
    Bind {
        source: io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("server error: {source}"))]
    Serve {
        source: io::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
