use super::AnnotationsCache;
use crate::error::{CacheError, Result};

impl AnnotationsCache {
    /// Verify referential integrity, link symmetry, reverse-index coverage and
    /// the privacy couplings. Reports the first violation found.
    pub fn check_invariants(&self) -> Result<()> {
        for annotation in self.annotations.iter() {
            let id = annotation.unified_id;
            for list_id in &annotation.unified_list_ids {
                let list = self.lists.get(list_id).ok_or_else(|| {
                    CacheError::Inconsistent(format!(
                        "annotation {id} references missing list {list_id}"
                    ))
                })?;
                if !list.unified_annotation_ids.contains(&id) {
                    return Err(CacheError::Inconsistent(format!(
                        "list {list_id} lacks back-reference to annotation {id}"
                    )));
                }
            }
            if let Some(local_id) = &annotation.local_id {
                if self.index.annotation_by_local(local_id) != Some(id) {
                    return Err(CacheError::Inconsistent(format!(
                        "local annotation ID {local_id} does not resolve to {id}"
                    )));
                }
            }
            if let Some(remote_id) = &annotation.remote_id {
                if self.index.annotation_by_remote(remote_id) != Some(id) {
                    return Err(CacheError::Inconsistent(format!(
                        "remote annotation ID {remote_id} does not resolve to {id}"
                    )));
                }
            }
            if annotation.privacy_level.is_fully_private()
                && annotation
                    .unified_list_ids
                    .iter()
                    .any(|list_id| self.is_shared_list(list_id))
            {
                return Err(CacheError::Inconsistent(format!(
                    "private annotation {id} sits in a shared list"
                )));
            }
            if annotation.privacy_level.is_public() {
                for list_id in self.get_shared_page_list_ids(&annotation.normalized_page_url) {
                    if !annotation.unified_list_ids.contains(&list_id) {
                        return Err(CacheError::Inconsistent(format!(
                            "shared annotation {id} is missing page list {list_id}"
                        )));
                    }
                }
            }
        }

        for list in self.lists.iter() {
            let id = list.unified_id;
            for annotation_id in &list.unified_annotation_ids {
                let annotation = self.annotations.get(annotation_id).ok_or_else(|| {
                    CacheError::Inconsistent(format!(
                        "list {id} references missing annotation {annotation_id}"
                    ))
                })?;
                if !annotation.unified_list_ids.contains(&id) {
                    return Err(CacheError::Inconsistent(format!(
                        "annotation {annotation_id} lacks back-reference to list {id}"
                    )));
                }
            }
            if let Some(local_id) = list.local_id {
                if self.index.list_by_local(local_id) != Some(id) {
                    return Err(CacheError::Inconsistent(format!(
                        "local list ID {local_id} does not resolve to {id}"
                    )));
                }
            }
            if let Some(remote_id) = &list.remote_id {
                if self.index.list_by_remote(remote_id) != Some(id) {
                    return Err(CacheError::Inconsistent(format!(
                        "remote list ID {remote_id} does not resolve to {id}"
                    )));
                }
            }
        }

        for (page_url, list_ids) in &self.page_lists {
            if let Some(missing) = list_ids.iter().find(|id| !self.lists.contains(id)) {
                return Err(CacheError::Inconsistent(format!(
                    "page {page_url} references missing list {missing}"
                )));
            }
        }
        Ok(())
    }
}
