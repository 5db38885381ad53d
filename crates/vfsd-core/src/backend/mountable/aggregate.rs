//! The `computer://` aggregation algorithm: build a flat, deduplicated,
//! sorted list of synthetic directory entries from the platform's
//! drive/volume/mount graph, and diff successive builds into change events.

use crate::backend::{EntryKind, MonitorEvent, MonitorEventKind};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDrive {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub can_eject: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformVolume {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub drive_id: Option<String>,
    pub mount_id: Option<String>,
    pub can_mount: bool,
    pub can_eject: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformMount {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub volume_id: Option<String>,
    pub target_uri: String,
    pub can_unmount: bool,
    pub can_eject: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputerFile {
    pub filename: String,
    pub display_name: String,
    pub icon: String,
    pub target_uri: Option<String>,
    pub priority: i8,
    pub can_mount: bool,
    pub can_unmount: bool,
    pub can_eject: bool,
    pub origin_id: String,
}

fn sanitize_name(name: &str) -> String {
    name.replace('/', "\\")
}

/// `base` already carries its extension (e.g. `"X.drive"`); a collision
/// splices the counter before the extension so the filename still matches
/// `^[^/]+\.(drive|volume|mount)(-[0-9]+)?$`.
fn dedupe_filename(base: String, used: &mut HashMap<String, u32>) -> String {
    match used.get_mut(&base) {
        None => {
            used.insert(base.clone(), 0);
            base
        }
        Some(count) => {
            *count += 1;
            let (stem, ext) = base.rsplit_once('.').unwrap();
            format!("{stem}-{count}.{ext}")
        }
    }
}

/// Builds the sorted `computer://` listing from a platform snapshot,
/// following the build order: drive-with-volumes, then driveless volumes,
/// then volumeless mounts.
pub fn build(
    drives: &[PlatformDrive],
    volumes: &[PlatformVolume],
    mounts: &[PlatformMount],
) -> Vec<ComputerFile> {
    let mut used = HashMap::new();
    let mut entries = Vec::new();

    let volumes_by_drive: HashMap<&str, Vec<&PlatformVolume>> = {
        let mut map: HashMap<&str, Vec<&PlatformVolume>> = HashMap::new();
        for v in volumes {
            if let Some(drive_id) = &v.drive_id {
                map.entry(drive_id.as_str()).or_default().push(v);
            }
        }
        map
    };
    let mounts_by_volume: HashMap<&str, &PlatformMount> = mounts
        .iter()
        .filter_map(|m| m.volume_id.as_deref().map(|vid| (vid, m)))
        .collect();

    for drive in drives {
        let drive_volumes = volumes_by_drive.get(drive.id.as_str());
        match drive_volumes {
            Some(vols) if !vols.is_empty() => {
                for vol in vols {
                    entries.push(volume_entry(
                        vol,
                        mounts_by_volume.get(vol.id.as_str()).copied(),
                        Some(drive),
                        &mut used,
                    ));
                }
            }
            _ => {
                let base = format!("{}.drive", sanitize_name(&drive.name));
                let filename = dedupe_filename(base, &mut used);
                entries.push(ComputerFile {
                    filename,
                    display_name: drive.name.clone(),
                    icon: drive.icon.clone(),
                    target_uri: None,
                    priority: -3,
                    can_mount: false,
                    can_unmount: false,
                    can_eject: drive.can_eject,
                    origin_id: drive.id.clone(),
                });
            }
        }
    }

    for vol in volumes.iter().filter(|v| v.drive_id.is_none()) {
        entries.push(volume_entry(
            vol,
            mounts_by_volume.get(vol.id.as_str()).copied(),
            None,
            &mut used,
        ));
    }

    for mount in mounts.iter().filter(|m| m.volume_id.is_none()) {
        let base = format!("{}.mount", sanitize_name(&mount.name));
        let filename = dedupe_filename(base, &mut used);
        entries.push(ComputerFile {
            filename,
            display_name: mount.name.clone(),
            icon: mount.icon.clone(),
            target_uri: Some(mount.target_uri.clone()),
            priority: -1,
            can_mount: false,
            can_unmount: mount.can_unmount,
            can_eject: mount.can_eject,
            origin_id: mount.id.clone(),
        });
    }

    entries.sort_by(|a, b| a.filename.cmp(&b.filename));
    entries
}

fn volume_entry(
    vol: &PlatformVolume,
    mount: Option<&PlatformMount>,
    drive: Option<&PlatformDrive>,
    used: &mut HashMap<String, u32>,
) -> ComputerFile {
    let base = format!("{}.volume", sanitize_name(&vol.name));
    let filename = dedupe_filename(base, used);
    // Eject capability tries the mount first, then the volume, then the
    // drive underneath it — a bare drive (e.g. an optical tray) can be
    // ejectable even when the volume or mount layer never learned about it.
    let can_eject = mount
        .map(|m| m.can_eject)
        .unwrap_or_else(|| vol.can_eject || drive.map(|d| d.can_eject).unwrap_or(false));
    ComputerFile {
        filename,
        display_name: vol.name.clone(),
        icon: vol.icon.clone(),
        target_uri: mount.map(|m| m.target_uri.clone()),
        priority: -2,
        can_mount: vol.can_mount && mount.is_none(),
        can_unmount: mount.map(|m| m.can_unmount).unwrap_or(false),
        can_eject,
        origin_id: vol.id.clone(),
    }
}

fn deep_equal(a: &ComputerFile, b: &ComputerFile) -> bool {
    a.display_name == b.display_name
        && a.icon == b.icon
        && a.target_uri == b.target_uri
        && a.priority == b.priority
        && a.can_mount == b.can_mount
        && a.can_unmount == b.can_unmount
        && a.can_eject == b.can_eject
}

/// Merges the previous and newly built (sorted) lists by filename, emitting
/// CREATED/DELETED/CHANGED events. Equal filename with an equal record
/// produces no event.
pub fn diff(old: &[ComputerFile], new: &[ComputerFile]) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    let mut oi = 0;
    let mut ni = 0;
    while oi < old.len() || ni < new.len() {
        match (old.get(oi), new.get(ni)) {
            (Some(o), Some(n)) => match o.filename.cmp(&n.filename) {
                std::cmp::Ordering::Equal => {
                    if !deep_equal(o, n) {
                        events.push(MonitorEvent {
                            kind: MonitorEventKind::Changed,
                            path: format!("/{}", n.filename),
                        });
                    }
                    oi += 1;
                    ni += 1;
                }
                std::cmp::Ordering::Less => {
                    events.push(MonitorEvent {
                        kind: MonitorEventKind::Deleted,
                        path: format!("/{}", o.filename),
                    });
                    oi += 1;
                }
                std::cmp::Ordering::Greater => {
                    events.push(MonitorEvent {
                        kind: MonitorEventKind::Created,
                        path: format!("/{}", n.filename),
                    });
                    ni += 1;
                }
            },
            (Some(o), None) => {
                events.push(MonitorEvent {
                    kind: MonitorEventKind::Deleted,
                    path: format!("/{}", o.filename),
                });
                oi += 1;
            }
            (None, Some(n)) => {
                events.push(MonitorEvent {
                    kind: MonitorEventKind::Created,
                    path: format!("/{}", n.filename),
                });
                ni += 1;
            }
            (None, None) => unreachable!(),
        }
    }
    events
}

pub fn filename_kind(filename: &str) -> Option<EntryKind> {
    if filename.ends_with(".drive") || filename.ends_with(".volume") || filename.ends_with(".mount")
    {
        Some(EntryKind::Mountable)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(id: &str, name: &str) -> PlatformDrive {
        PlatformDrive {
            id: id.into(),
            name: name.into(),
            icon: "drive-harddisk".into(),
            can_eject: false,
        }
    }

    fn ejectable_drive(id: &str, name: &str) -> PlatformDrive {
        PlatformDrive {
            can_eject: true,
            ..drive(id, name)
        }
    }

    fn volume(id: &str, name: &str, drive_id: Option<&str>) -> PlatformVolume {
        PlatformVolume {
            id: id.into(),
            name: name.into(),
            icon: "drive-removable-media".into(),
            drive_id: drive_id.map(String::from),
            mount_id: None,
            can_mount: true,
            can_eject: false,
        }
    }

    fn mount(id: &str, name: &str, volume_id: Option<&str>) -> PlatformMount {
        PlatformMount {
            id: id.into(),
            name: name.into(),
            icon: "folder-remote".into(),
            volume_id: volume_id.map(String::from),
            target_uri: format!("file:///mnt/{name}"),
            can_unmount: true,
            can_eject: false,
        }
    }

    #[test]
    fn driveless_drive_emits_drive_only_entry_with_lowest_priority() {
        let entries = build(&[drive("d1", "Disk")], &[], &[]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, "Disk.drive");
        assert_eq!(entries[0].priority, -3);
    }

    #[test]
    fn drive_with_volume_emits_volume_not_drive_entry() {
        let entries = build(&[drive("d1", "Disk")], &[volume("v1", "Data", Some("d1"))], &[]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, "Data.volume");
        assert_eq!(entries[0].priority, -2);
    }

    #[test]
    fn driveless_volume_and_volumeless_mount_both_appear() {
        let entries = build(&[], &[volume("v1", "USB", None)], &[mount("m1", "Share", None)]);
        let names: Vec<&str> = entries.iter().map(|e| e.filename.as_str()).collect();
        assert!(names.contains(&"USB.volume"));
        assert!(names.contains(&"Share.mount"));
    }

    #[test]
    fn filename_collision_gets_numeric_suffix() {
        let entries = build(&[drive("d1", "Removable Media"), drive("d2", "Removable Media")], &[], &[]);
        let mut names: Vec<&str> = entries.iter().map(|e| e.filename.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Removable Media-1.drive", "Removable Media.drive"]);
    }

    #[test]
    fn name_with_slash_is_escaped_to_backslash() {
        let entries = build(&[drive("d1", "A/B")], &[], &[]);
        assert_eq!(entries[0].filename, "A\\B.drive");
    }

    #[test]
    fn list_is_sorted_by_filename() {
        let entries = build(&[drive("d1", "Zeta"), drive("d2", "Alpha")], &[], &[]);
        assert_eq!(entries[0].filename, "Alpha.drive");
        assert_eq!(entries[1].filename, "Zeta.drive");
    }

    #[test]
    fn diff_of_identical_lists_is_empty() {
        let entries = build(&[drive("d1", "Disk")], &[], &[]);
        assert!(diff(&entries, &entries).is_empty());
    }

    #[test]
    fn diff_detects_created_and_deleted() {
        let old = build(&[drive("d1", "Disk")], &[], &[]);
        let new = build(&[drive("d2", "Other")], &[], &[]);
        let events = diff(&old, &new);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn diff_detects_mount_attaching_to_existing_volume_as_changed() {
        let old = build(&[], &[volume("v1", "USB", None)], &[]);
        let new = build(&[], &[volume("v1", "USB", None)], &[mount("m1", "USB", Some("v1"))]);
        let events = diff(&old, &new);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, MonitorEventKind::Changed);
        assert_eq!(events[0].path, "/USB.volume");
    }

    #[test]
    fn mounted_volume_can_unmount_and_cannot_mount_again() {
        let new = build(&[], &[volume("v1", "USB", None)], &[mount("m1", "USB", Some("v1"))]);
        assert!(!new[0].can_mount);
        assert!(new[0].can_unmount);
    }

    #[test]
    fn driveless_drive_entry_carries_its_own_can_eject() {
        let entries = build(&[ejectable_drive("d1", "Disk")], &[], &[]);
        assert!(entries[0].can_eject);
    }

    #[test]
    fn mount_can_eject_wins_over_the_volume_and_drive_underneath() {
        let mut m = mount("m1", "USB", Some("v1"));
        m.can_eject = true;
        let entries = build(&[drive("d1", "Disk")], &[volume("v1", "USB", Some("d1"))], &[m]);
        assert!(entries[0].can_eject);
    }

    #[test]
    fn volume_falls_back_to_the_drive_when_neither_it_nor_the_mount_can_eject() {
        let entries = build(
            &[ejectable_drive("d1", "Disk")],
            &[volume("v1", "USB", Some("d1"))],
            &[mount("m1", "USB", Some("v1"))],
        );
        assert!(entries[0].can_eject, "drive's can_eject should carry through an unmounted-unaware volume/mount");
    }

    #[test]
    fn unmounted_volume_with_no_ejectable_drive_cannot_eject() {
        let entries = build(&[drive("d1", "Disk")], &[volume("v1", "USB", Some("d1"))], &[]);
        assert!(!entries[0].can_eject);
    }
}
