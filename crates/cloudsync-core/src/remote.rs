use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Provider;

/// Provider coordinates derived from one push-capable git remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteCandidate {
    pub provider: Provider,
    pub organization: String,
    pub repository: String,
}

impl RemoteCandidate {
    pub fn new(
        provider: Provider,
        organization: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            organization: organization.into(),
            repository: repository.into(),
        }
    }

    /// Parses `git@host:org/repo.git`, `ssh://git@host/org/repo` and
    /// `https://user@host/org/group/repo.git` style URLs.
    ///
    /// The organization is the first path segment and the repository is the
    /// last one. Hosts that do not belong to a known provider yield `None`.
    pub fn from_remote_url(url: &str) -> Option<Self> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }

        let (host, path) = match url.split_once("://") {
            Some((_scheme, rest)) => {
                let (authority, path) = rest.split_once('/')?;
                let host = strip_userinfo(authority);
                let host = host.split(':').next().unwrap_or(host);
                (host, path)
            }
            None => {
                let (authority, path) = url.split_once(':')?;
                (strip_userinfo(authority), path)
            }
        };

        let provider = provider_for_host(host)?;
        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>();
        if segments.len() < 2 {
            return None;
        }

        Some(Self::new(
            provider,
            segments[0],
            segments[segments.len() - 1],
        ))
    }
}

impl fmt::Display for RemoteCandidate {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}/{}/{}",
            self.provider, self.organization, self.repository
        )
    }
}

fn strip_userinfo(authority: &str) -> &str {
    authority
        .rsplit_once('@')
        .map(|(_, host)| host)
        .unwrap_or(authority)
}

fn provider_for_host(host: &str) -> Option<Provider> {
    let host = host.to_ascii_lowercase();
    if host.contains("github") {
        Some(Provider::GitHub)
    } else if host.contains("gitlab") {
        Some(Provider::GitLab)
    } else if host.contains("bitbucket") {
        Some(Provider::Bitbucket)
    } else {
        None
    }
}
