use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::StreamExt;
use headers::HeaderMapExt;
use http::StatusCode as SC;
use http::{Request, Response};

use crate::DavResult;
use crate::async_stream::AsyncStream;
use crate::body::Body;
use crate::conditional::if_match_get_tokens;
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::{DavError, fserror_to_status};
use crate::fs::*;
use crate::multierror::{MultiError, multi_error};
use crate::util::DavMethod;

// Record a failed pair under its destination URL, and remember the
// source so that a MOVE does not delete it.
async fn copy_fail(
    res: &mut MultiError,
    skipped: &mut Vec<DavPath>,
    dest: &DavPath,
    source: &DavPath,
    status: SC,
) -> DavResult<()> {
    res.add_status(dest, status).await?;
    skipped.push(source.clone());
    Err(DavError::Status(status))
}

impl crate::DavInner {
    // Copy one source/destination pair, and recurse for collections.
    // Failures are recorded under the destination URL; a failed source
    // is remembered in `skipped` so that MOVE leaves it in place.
    #[allow(clippy::too_many_arguments)]
    fn copy_items<'a>(
        &'a self,
        res: &'a mut MultiError,
        source: &'a DavPath,
        topdest: &'a DavPath,
        dest: &'a DavPath,
        depth: Depth,
        overwrite: bool,
        tokens: &'a [String],
        is_move: bool,
        skipped: &'a mut Vec<DavPath>,
    ) -> BoxFuture<'a, DavResult<()>> {
        async move {
            debug!("copy_items {} {} depth {:?}", source, dest, depth);

            // when doing "COPY /a/b /a/b/c" make sure we don't
            // recursively copy /a/b/c into itself.
            if source == topdest {
                return Ok(());
            }

            // source must exist.
            let meta = match self.fs.metadata(source).await {
                Err(e) => return copy_fail(res, skipped, dest, source, fserror_to_status(e)).await,
                Ok(m) => m,
            };

            let t = tokens.iter().map(|s| s.as_str()).collect::<Vec<&str>>();
            let principal = self.principal.as_deref();

            if let Some(ref locksystem) = self.ls {
                // moving mutates the source.
                if is_move
                    && locksystem
                        .check(source, principal, false, false, t.clone())
                        .is_err()
                {
                    return copy_fail(res, skipped, dest, source, SC::LOCKED).await;
                }
                // and either way the destination.
                if locksystem.check(dest, principal, false, false, t).is_err() {
                    return copy_fail(res, skipped, dest, source, SC::LOCKED).await;
                }
            }

            // the destination parent must exist.
            if !self.has_parent(dest).await {
                return copy_fail(res, skipped, dest, source, SC::CONFLICT).await;
            }

            let dmeta = self.fs.symlink_metadata(dest).await;
            if let Ok(dmeta) = dmeta {
                if !overwrite {
                    return copy_fail(res, skipped, dest, source, SC::PRECONDITION_FAILED).await;
                }
                // delete the destination subtree first, bubbling any
                // failure into the multistatus.
                let mut dest = dest.clone();
                dest.add_slash_if(dmeta.is_dir());
                if self
                    .delete_items(res, Depth::Infinity, dmeta, &dest, tokens)
                    .await
                    .is_err()
                {
                    skipped.push(source.clone());
                    return Err(DavError::Status(SC::FAILED_DEPENDENCY));
                }
            }

            // materialize.
            if meta.is_dir() {
                if let Err(e) = self.fs.create_dir(dest).await {
                    debug!("copy_items: create_dir error: {:?}", e);
                    return copy_fail(res, skipped, dest, source, fserror_to_status(e)).await;
                }
            } else if let Err(e) = self.fs.copy(source, dest).await {
                debug!("copy_items: copy error: {:?}", e);
                return copy_fail(res, skipped, dest, source, fserror_to_status(e)).await;
            }

            // the destination gets a copy of the dead properties, and
            // joins any depth-infinity locks covering its new place.
            if let Some(ref propsystem) = self.ps {
                propsystem.copy_props(source, dest).ok();
            }
            if let Some(ref locksystem) = self.ls {
                locksystem.enroll(dest);
            }

            // only recurse when Depth > 0.
            if !meta.is_dir() || depth == Depth::Zero {
                return Ok(());
            }

            let mut entries = match self.fs.read_dir(source).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("copy_items: read_dir error: {:?}", e);
                    return copy_fail(res, skipped, dest, source, fserror_to_status(e)).await;
                },
            };

            // if we encounter errors, keep going so that independent
            // subtrees are still reported on. Last error is returned.
            let mut retval = Ok(());
            while let Some(dirent) = entries.next().await {
                // NOTE: dirent.metadata() behaves like symlink_metadata()
                let meta = match dirent.metadata().await {
                    Ok(meta) => meta,
                    Err(e) => {
                        retval = copy_fail(res, skipped, dest, source, fserror_to_status(e)).await;
                        continue;
                    },
                };
                let name = dirent.name();
                let mut nsrc = source.clone();
                let mut ndest = dest.clone();
                nsrc.push_segment(&name);
                ndest.push_segment(&name);
                if meta.is_dir() {
                    nsrc.add_slash();
                    ndest.add_slash();
                }
                if let Err(e) = self
                    .copy_items(res, &nsrc, topdest, &ndest, depth, overwrite, tokens, is_move, skipped)
                    .await
                {
                    retval = Err(e);
                }
            }

            if retval.is_err() {
                skipped.push(source.clone());
            }
            retval
        }
        .boxed()
    }

    // The destructive half of MOVE: drop the source subtree, leaving
    // alone everything whose copy failed (and, therefore, the
    // ancestors of such entries). Removed resources lose their dead
    // properties and lock associations.
    fn move_cleanup<'a>(
        &'a self,
        path: &'a DavPath,
        skipped: &'a [DavPath],
    ) -> BoxFuture<'a, bool> {
        async move {
            let self_skipped = skipped.iter().any(|p| p == path);
            let meta = match self.fs.symlink_metadata(path).await {
                Ok(m) => m,
                Err(_) => return false,
            };
            if meta.is_dir() {
                // children that did copy are still cleaned up, even
                // when this directory itself has to stay.
                let mut entries = match self.fs.read_dir(path).await {
                    Ok(entries) => entries,
                    Err(_) => return false,
                };
                let mut all_ok = true;
                while let Some(dirent) = entries.next().await {
                    let mut npath = path.clone();
                    npath.push_segment(&dirent.name());
                    if let Ok(m) = dirent.metadata().await {
                        npath.add_slash_if(m.is_dir());
                    }
                    all_ok &= self.move_cleanup(&npath, skipped).await;
                }
                if self_skipped || !all_ok || self.fs.remove_dir(path).await.is_err() {
                    return false;
                }
            } else if self_skipped || self.fs.remove_file(path).await.is_err() {
                return false;
            }
            if let Some(ref propsystem) = self.ps {
                propsystem.remove_props(path).ok();
            }
            if let Some(ref locksystem) = self.ls {
                locksystem.delete(path).ok();
            }
            true
        }
        .boxed()
    }

    pub(crate) async fn handle_copymove(
        self,
        req: &Request<()>,
        mut path: DavPath,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        // get and check headers.
        let overwrite = req
            .headers()
            .typed_get::<davheaders::Overwrite>()
            .map_or(true, |o| o.0);
        let depth = match req.headers().typed_get::<Depth>() {
            Some(Depth::Infinity) | None => Depth::Infinity,
            Some(Depth::Zero) if method == DavMethod::Copy => Depth::Zero,
            _ => return Err(DavError::Status(SC::BAD_REQUEST)),
        };

        // the Destination: header has already been resolved through
        // the realm table; crossing realms was rejected there.
        let mut dest = match self.destination {
            Some(ref d) => d.clone(),
            None => return Err(DavError::Status(SC::BAD_REQUEST)),
        };

        // for MOVE, tread with care: if the path ends in "/" but it
        // actually is a symlink, we want to move the symlink itself.
        let meta = if method == DavMethod::Move {
            let meta = self.fs.symlink_metadata(&path).await?;
            if meta.is_symlink() {
                let m2 = self.fs.metadata(&path).await?;
                path.add_slash_if(m2.is_dir());
            }
            meta
        } else {
            self.fs.metadata(&path).await?
        };
        path.add_slash_if(meta.is_dir());
        dest.add_slash_if(meta.is_dir());

        // source and destination must differ.
        if path == dest {
            return Err(DavError::Status(SC::FORBIDDEN));
        }

        let dest_existed = self.fs.symlink_metadata(&dest).await.is_ok();

        // check the conditional headers for the source.
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

        let req_path = dest.clone();
        let items = AsyncStream::new(|tx| async move {
            let mut multierror = MultiError::new(tx);
            let mut skipped = Vec::new();
            let topdest = dest.clone();
            let ok = self
                .copy_items(
                    &mut multierror,
                    &path,
                    &topdest,
                    &dest,
                    depth,
                    overwrite,
                    &tokens,
                    method == DavMethod::Move,
                    &mut skipped,
                )
                .await
                .is_ok();

            if method == DavMethod::Move {
                // delete the source subtree, skipping failed copies.
                self.move_cleanup(&path, &skipped).await;
            }

            if ok {
                let s = if dest_existed { SC::NO_CONTENT } else { SC::CREATED };
                multierror.add_status(&dest, s).await?;
            }
            Ok(())
        });

        multi_error(req_path, items).await
    }
}
