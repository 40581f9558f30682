/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod compute;
pub mod filesystem;
pub mod status;
pub mod transfer;

pub(crate) mod prelude {
    pub(crate) use std::sync::Arc;

    pub(crate) use dropshot::{
        endpoint, HttpError, HttpResponseCreated, HttpResponseDeleted,
        HttpResponseOk, HttpResponseUpdatedNoContent, Path as TypedPath,
        Query as TypedQuery, RequestContext, TypedBody, UntypedBody,
    };
    pub(crate) use hyper::{Body, Response, StatusCode};
    pub(crate) use schemars::JsonSchema;
    #[allow(unused_imports)]
    pub(crate) use serde::{Deserialize, Serialize};
    #[allow(unused_imports)]
    pub(crate) use slog::{debug, error, info, o, warn, Logger};

    pub(crate) use clusteromat_types::health::ServiceType;

    pub(crate) use crate::error::{DSResult, Error, OrHttpError};
    pub(crate) use crate::{AuthUser, Central, ClusterHandle};
}

use prelude::*;

/**
 * The {system} path segment common to all per-cluster endpoints.
 */
#[derive(Deserialize, JsonSchema)]
pub(crate) struct SystemPath {
    pub system: String,
}

/**
 * Resolve a cluster, gate on the named service's health, and
 * authenticate the caller: the common preamble of every mediated
 * request.
 */
pub(crate) async fn mediate(
    rqctx: &RequestContext<Arc<Central>>,
    system: &str,
    service: ServiceType,
) -> DSResult<(Arc<ClusterHandle>, AuthUser)> {
    let c = rqctx.context();
    let cluster = c.cluster(system).or_http()?;
    cluster.require_service(service).or_http()?;
    let user = c.require_user(&rqctx.log, &rqctx.request)?;
    Ok((cluster, user))
}
