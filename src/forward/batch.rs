//! Send-batch construction: partitions scratch units into batches the
//! service will accept in one group-send.

use crate::client::{GroupItem, MediaKind};

use super::scratch::{ScratchHandle, ScratchUnit};

/// Media-kind compatibility class of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchType {
    /// Photos and videos may share an album
    PhotoVideo,
    /// Documents group only with documents
    Document,
    /// Audio groups only with audio
    Audio,
    /// Voice, video-note, animation, or any lone item: one single-send
    Single,
}

impl BatchType {
    fn of(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Photo | MediaKind::Video => Self::PhotoVideo,
            MediaKind::Document => Self::Document,
            MediaKind::Audio => Self::Audio,
            _ => Self::Single,
        }
    }
}

/// One batch-send payload: compatible handles for one destination,
/// caption on the first item.
#[derive(Debug, Clone)]
pub struct SendBatch {
    pub batch_type: BatchType,
    pub handles: Vec<ScratchHandle>,
    pub caption: Option<String>,
    /// Source unit first-ids covered by this batch, for outcome
    /// attribution when batches merge units
    pub unit_ids: Vec<i64>,
}

impl SendBatch {
    pub fn is_singleton(&self) -> bool {
        self.handles.len() == 1
    }

    pub fn group_items(&self) -> Vec<GroupItem> {
        self.handles
            .iter()
            .map(|h| GroupItem { media: h.media_id.clone(), kind: h.kind })
            .collect()
    }
}

/// Partition one staged unit into batches, preserving source
/// structure: a singleton yields one single-send; a group yields one
/// batch per compatibility class present, in order of first
/// occurrence. The unit's rendered caption goes on each batch.
pub fn split_unit(unit: &ScratchUnit, caption: Option<&str>, batch_size: usize) -> Vec<SendBatch> {
    let caption = caption.map(str::to_string);

    if !unit.is_group() {
        return unit
            .handles
            .iter()
            .map(|handle| SendBatch {
                batch_type: BatchType::Single,
                handles: vec![handle.clone()],
                caption: caption.clone(),
                unit_ids: vec![unit.first_id()],
            })
            .collect();
    }

    let mut batches: Vec<SendBatch> = Vec::new();

    for handle in &unit.handles {
        let class = BatchType::of(handle.kind);

        if class == BatchType::Single {
            batches.push(SendBatch {
                batch_type: BatchType::Single,
                handles: vec![handle.clone()],
                caption: caption.clone(),
                unit_ids: vec![unit.first_id()],
            });
            continue;
        }

        match batches
            .iter_mut()
            .find(|b| b.batch_type == class && b.handles.len() < batch_size)
        {
            Some(batch) => batch.handles.push(handle.clone()),
            None => batches.push(SendBatch {
                batch_type: class,
                handles: vec![handle.clone()],
                caption: caption.clone(),
                unit_ids: vec![unit.first_id()],
            }),
        }
    }

    // A class that ended up with one handle is a single-send.
    for batch in &mut batches {
        if batch.handles.len() == 1 {
            batch.batch_type = BatchType::Single;
        }
    }

    batches
}

/// Legacy path: merge handles across units into batches of up to
/// `batch_size` per compatibility class, in source order. Captions
/// come from each batch's first handle.
pub fn rebatch(units: &[ScratchUnit], batch_size: usize) -> Vec<SendBatch> {
    let mut batches: Vec<SendBatch> = Vec::new();
    // Index into `batches` of the open batch per class
    let mut open: [Option<usize>; 3] = [None; 3];

    let class_slot = |class: BatchType| match class {
        BatchType::PhotoVideo => 0,
        BatchType::Document => 1,
        BatchType::Audio => 2,
        BatchType::Single => unreachable!("singles never pool"),
    };

    for unit in units {
        for handle in &unit.handles {
            let class = BatchType::of(handle.kind);

            if class == BatchType::Single {
                batches.push(SendBatch {
                    batch_type: BatchType::Single,
                    handles: vec![handle.clone()],
                    caption: handle.caption.clone(),
                    unit_ids: vec![unit.first_id()],
                });
                continue;
            }

            let slot = class_slot(class);
            let index = match open[slot] {
                Some(index) if batches[index].handles.len() < batch_size => index,
                _ => {
                    batches.push(SendBatch {
                        batch_type: class,
                        handles: Vec::new(),
                        caption: handle.caption.clone(),
                        unit_ids: Vec::new(),
                    });
                    let index = batches.len() - 1;
                    open[slot] = Some(index);
                    index
                }
            };

            batches[index].handles.push(handle.clone());
            if !batches[index].unit_ids.contains(&unit.first_id()) {
                batches[index].unit_ids.push(unit.first_id());
            }
        }
    }

    for batch in &mut batches {
        if batch.handles.len() == 1 {
            batch.batch_type = BatchType::Single;
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChannelRef, MediaId, Message};
    use crate::group::AtomicUnit;
    use chrono::Utc;
    use tokio::time::Instant;

    fn handle(message_id: i64, kind: MediaKind) -> ScratchHandle {
        ScratchHandle {
            session: "alpha".into(),
            message_id,
            media_id: MediaId(format!("m{message_id}")),
            kind,
            caption: Some(format!("cap{message_id}")),
            created_at: Instant::now(),
        }
    }

    fn group_unit(first_id: i64, kinds: &[MediaKind]) -> ScratchUnit {
        let messages: Vec<Message> = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| Message {
                channel: ChannelRef::new("@src"),
                id: first_id + i as i64,
                date: Utc::now(),
                text: None,
                caption: None,
                group_id: Some("g".into()),
                kind: *kind,
                size: 1,
                file_name: None,
            })
            .collect();
        let handles = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| handle(100 + first_id + i as i64, *kind))
            .collect();
        ScratchUnit {
            source: AtomicUnit::Group(crate::group::MediaGroup::new("g".into(), messages)),
            handles,
        }
    }

    fn singleton_unit(id: i64, kind: MediaKind) -> ScratchUnit {
        let message = Message {
            channel: ChannelRef::new("@src"),
            id,
            date: Utc::now(),
            text: None,
            caption: None,
            group_id: None,
            kind,
            size: 1,
            file_name: None,
        };
        ScratchUnit {
            source: AtomicUnit::Singleton(message),
            handles: vec![handle(100 + id, kind)],
        }
    }

    #[test]
    fn singleton_yields_single_send() {
        let unit = singleton_unit(1, MediaKind::Photo);
        let batches = split_unit(&unit, Some("hello"), 10);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].batch_type, BatchType::Single);
        assert_eq!(batches[0].caption.as_deref(), Some("hello"));
    }

    #[test]
    fn mixed_group_partitions_by_class() {
        use MediaKind::*;
        let unit = group_unit(10, &[Photo, Document, Photo, Document, Photo]);
        let batches = split_unit(&unit, Some("c"), 10);

        // 3 photos in one batch, 2 documents in another, photos first.
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].batch_type, BatchType::PhotoVideo);
        assert_eq!(batches[0].handles.len(), 3);
        assert_eq!(batches[1].batch_type, BatchType::Document);
        assert_eq!(batches[1].handles.len(), 2);
        // Caption attached to each batch.
        assert!(batches.iter().all(|b| b.caption.as_deref() == Some("c")));
    }

    #[test]
    fn photo_video_share_one_batch() {
        use MediaKind::*;
        let unit = group_unit(10, &[Photo, Video, Photo]);
        let batches = split_unit(&unit, Option::None, 10);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].handles.len(), 3);
    }

    #[test]
    fn voice_is_always_single() {
        use MediaKind::*;
        let unit = group_unit(10, &[Photo, Voice, Photo]);
        let batches = split_unit(&unit, Option::None, 10);

        assert_eq!(batches.len(), 2);
        assert!(batches.iter().any(|b| b.batch_type == BatchType::Single
            && b.handles[0].kind == Voice));
    }

    #[test]
    fn batch_size_bounds_respected() {
        let kinds = vec![MediaKind::Photo; 12];
        let unit = group_unit(10, &kinds);
        let batches = split_unit(&unit, None, 10);

        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.handles.len() <= 10));
    }

    #[test]
    fn rebatch_merges_across_units() {
        let units = vec![
            singleton_unit(1, MediaKind::Photo),
            singleton_unit(2, MediaKind::Photo),
            singleton_unit(3, MediaKind::Photo),
        ];
        let batches = rebatch(&units, 10);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].handles.len(), 3);
        assert_eq!(batches[0].unit_ids, vec![1, 2, 3]);
        // Legacy captions come from the first handle.
        assert_eq!(batches[0].caption.as_deref(), Some("cap101"));
    }

    #[test]
    fn rebatch_rolls_over_at_cap() {
        let units: Vec<ScratchUnit> =
            (1..=12).map(|id| singleton_unit(id, MediaKind::Photo)).collect();
        let batches = rebatch(&units, 10);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].handles.len(), 10);
        assert_eq!(batches[1].handles.len(), 2);
    }
}
