use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::StreamExt;
use headers::HeaderMapExt;
use http::StatusCode as SC;
use http::{Request, Response};

use crate::DavResult;
use crate::async_stream::AsyncStream;
use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::*;
use crate::multierror::{MultiError, multi_error};

impl crate::DavInner {
    // Remove a single resource, after verifying that the submitted
    // lock tokens satisfy every lock covering it. Purges the dead
    // properties and lock associations of what was removed.
    async fn delete_one(
        &self,
        res: &mut MultiError,
        path: &DavPath,
        tokens: &[String],
        is_dir: bool,
    ) -> DavResult<()> {
        if let Some(ref locksystem) = self.ls {
            let t = tokens.iter().map(|s| s.as_str()).collect::<Vec<&str>>();
            let principal = self.principal.as_deref();
            if locksystem.check(path, principal, false, false, t).is_err() {
                res.add_status(path, SC::LOCKED).await?;
                return Err(DavError::Status(SC::LOCKED));
            }
        }
        let rm = if is_dir {
            self.fs.remove_dir(path).await
        } else {
            self.fs.remove_file(path).await
        };
        if let Err(e) = rm {
            // failures on a directory map a bit differently.
            let status = match e {
                FsError::Exists => SC::CONFLICT,
                e => crate::errors::fserror_to_status(e),
            };
            res.add_status(path, status).await?;
            return Err(DavError::Status(status));
        }
        if let Some(ref propsystem) = self.ps {
            propsystem.remove_props(path).ok();
        }
        if let Some(ref locksystem) = self.ls {
            locksystem.delete(path).ok();
        }
        Ok(())
    }

    // Walk the subtree post-order. A failed entry is recorded under
    // its own URL; its ancestors become implicit 424 failures and are
    // not retried.
    pub(crate) fn delete_items<'a>(
        &'a self,
        res: &'a mut MultiError,
        depth: Depth,
        meta: Box<dyn DavMetaData>,
        path: &'a DavPath,
        tokens: &'a [String],
    ) -> BoxFuture<'a, DavResult<()>> {
        async move {
            if !meta.is_dir() {
                debug!("delete_items (file) {} {:?}", path, depth);
                return self.delete_one(res, path, tokens, false).await;
            }
            if depth == Depth::Zero {
                debug!("delete_items (dir) {} {:?}", path, depth);
                return self.delete_one(res, path, tokens, true).await;
            }
            debug!("delete_items (recurse) {} {:?}", path, depth);

            // walk over all entries.
            let mut entries = match self.fs.read_dir(path).await {
                Ok(entries) => entries,
                Err(e) => {
                    res.add_status(path, crate::errors::fserror_to_status(e)).await?;
                    return Err(DavError::FsError(e));
                },
            };

            let mut result = Ok(());
            while let Some(dirent) = entries.next().await {
                // if metadata() fails, skip to the next entry.
                // NOTE: dirent.metadata == symlink_metadata (!)
                let meta = match dirent.metadata().await {
                    Ok(m) => m,
                    Err(e) => {
                        result = Err(DavError::FsError(e));
                        continue;
                    },
                };

                let mut npath = path.clone();
                npath.push_segment(&dirent.name());
                npath.add_slash_if(meta.is_dir());

                if let Err(e) = self.delete_items(res, depth, meta, &npath, tokens).await {
                    match e {
                        DavError::Status(_) => {
                            result = Err(e);
                            continue;
                        },
                        _ => return Err(e),
                    }
                }
            }

            // if any entry failed, the directory is not retried: it
            // becomes an implicit failure.
            if result.is_err() {
                res.add_status(path, SC::FAILED_DEPENDENCY).await?;
                result?;
            }

            self.delete_one(res, path, tokens, true).await
        }
        .boxed()
    }

    pub(crate) async fn handle_delete(
        self,
        req: &Request<()>,
        mut path: DavPath,
    ) -> DavResult<Response<Body>> {
        let meta = self.fs.symlink_metadata(&path).await?;
        if meta.is_symlink() {
            if let Ok(m2) = self.fs.metadata(&path).await {
                path.add_slash_if(m2.is_dir());
            }
        }
        path.add_slash_if(meta.is_dir());

        // RFC 4918 9.6.1: DELETE on a collection acts as if
        // Depth: infinity was used, whatever the client said.
        let depth = match req.headers().typed_get::<Depth>() {
            Some(Depth::Infinity) | None => Depth::Infinity,
            Some(Depth::Zero) if !meta.is_dir() => Depth::Zero,
            _ => return Err(DavError::Status(SC::BAD_REQUEST)),
        };

        // check the conditional headers for the request target.
        let tokens = match if_match_get_tokens(
            req,
            Some(&*meta),
            &*self.fs,
            self.ls.as_deref(),
            &path,
        )
        .await
        {
            Ok(t) => t,
            Err(s) => return Err(DavError::Status(s)),
        };

        let req_path = path.clone();
        let items = AsyncStream::new(|tx| async move {
            let mut multierror = MultiError::new(tx);
            if self
                .delete_items(&mut multierror, depth, meta, &path, &tokens)
                .await
                .is_ok()
            {
                multierror.add_status(&path, SC::NO_CONTENT).await?;
            }
            Ok(())
        });

        multi_error(req_path, items).await
    }
}
