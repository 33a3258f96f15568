use std::io;
use std::path::Path;
use std::sync::Arc;

use fuse_backend_rs::api::filesystem::FileSystem;
use fuse_backend_rs::api::server::Server;
use fuse_backend_rs::transport::{FuseChannel, FuseSession};
use parking_lot::Mutex;
use threadpool::ThreadPool;
use tracing::{error, instrument};

struct FuseServer<FS>
where
    FS: FileSystem + Sync + Send,
{
    server: Arc<Server<Arc<FS>>>,
    channel: FuseChannel,
}

#[cfg(target_os = "macos")]
const BADFD: libc::c_int = libc::EBADF;
#[cfg(target_os = "linux")]
const BADFD: libc::c_int = libc::EBADFD;

impl<FS> FuseServer<FS>
where
    FS: FileSystem + Sync + Send,
{
    fn start(&mut self) -> io::Result<()> {
        loop {
            if let Some((reader, writer)) = self.channel.get_request().map_err(|err| {
                error!(?err, "failed to get FUSE request");
                io::Error::from_raw_os_error(libc::EINVAL)
            })? {
                if let Err(err) = self
                    .server
                    .handle_message(reader, writer.into(), None, None)
                {
                    match err {
                        fuse_backend_rs::Error::EncodeMessage(io_err)
                            if io_err.raw_os_error() == Some(BADFD) =>
                        {
                            break;
                        }
                        err => {
                            error!(?err, "failed to handle FUSE message");
                            continue;
                        }
                    }
                }
            } else {
                break;
            }
        }
        Ok(())
    }
}

/// Owns the FUSE session and the thread pool serving it, the same shape as
/// the teacher's threadpool-based daemon. Each thread runs its own
/// `FuseServer::start` read loop.
#[derive(Clone)]
pub struct FuseDaemon {
    session: Arc<Mutex<FuseSession>>,
    threads: Arc<ThreadPool>,
}

impl FuseDaemon {
    #[instrument(skip(fs))]
    pub fn new<FS, P>(
        fs: FS,
        mountpoint: P,
        num_threads: usize,
        allow_other: bool,
    ) -> Result<Self, io::Error>
    where
        FS: FileSystem + Sync + Send + 'static,
        P: AsRef<Path> + std::fmt::Debug,
    {
        let fs = Arc::new(fs);
        let server = Arc::new(Server::new(fs));

        let mut session = FuseSession::new(mountpoint.as_ref(), "redisfs", "", true)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        if allow_other {
            session.set_allow_other(true);
        }
        session
            .mount()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;

        let threads = threadpool::Builder::new()
            .num_threads(num_threads.max(1))
            .thread_name("fuse_server".to_string())
            .build();

        for _ in 0..num_threads.max(1) {
            let channel = session
                .new_channel()
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
            let server = server.clone();
            threads.execute(move || {
                let mut worker = FuseServer { server, channel };
                if let Err(err) = worker.start() {
                    error!(?err, "fuse worker exited with error");
                }
            });
        }

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            threads: Arc::new(threads),
        })
    }

    pub fn wait(&self) {
        self.threads.join();
    }

    pub fn unmount(&self) -> Result<(), io::Error> {
        self.session
            .lock()
            .umount()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        self.wait();
        Ok(())
    }
}

impl Drop for FuseDaemon {
    fn drop(&mut self) {
        if let Err(error) = self.unmount() {
            error!(%error, "failed to unmount on drop");
        }
    }
}
