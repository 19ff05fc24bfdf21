mod block_stream;
mod format;
mod package;
mod reader;
mod request;
mod shared_stream;
mod writer;

pub use block_stream::BlockStream;
pub use format::{
    BlockInfo, PackageHeader, PendingOp, BLOCK_INFO_SIZE, FILE_LIST_NAME, HEADER_SIZE, MAGIC_ID,
    MAX_BLOCK_SIZE, PACKAGE_EXT, VERSION,
};
pub use package::{BlockObserverFn, Package, ProcessState, ProgressFn, StreamObserverFn};
pub use request::StreamRequest;
pub use shared_stream::{ArchiveSource, SharedStream};
