use crate::domain::models::{parse_hhmm, Section, MINUTES_PER_DAY};

/// Half-open containment over minutes of day. A block whose end is
/// numerically below its start wraps past midnight, so containment becomes
/// `[start, 1440) ∪ [0, end)`.
pub fn contains(start_min: u32, end_min: u32, t_min: u32) -> bool {
    if start_min <= end_min {
        t_min >= start_min && t_min < end_min
    } else {
        t_min >= start_min || t_min < end_min
    }
}

/// Forward distance from a block's start to a query minute, in 0..1440.
fn distance_from_start(start_min: u32, t_min: u32) -> u32 {
    (t_min + MINUTES_PER_DAY - start_min) % MINUTES_PER_DAY
}

/// Classify a wall-clock time into the enclosing section. When several
/// sections contain the time, the most recently started one wins.
pub fn assign_section(sections: &[Section], hhmm: Option<&str>) -> Option<String> {
    let t_min = hhmm.and_then(parse_hhmm)?;
    assign_section_for_minute(sections, t_min)
}

pub fn assign_section_for_minute(sections: &[Section], t_min: u32) -> Option<String> {
    let mut best: Option<(&Section, u32)> = None;
    for section in sections {
        let Some(start_min) = parse_hhmm(&section.start_at) else {
            continue;
        };
        let Some(end_min) = parse_hhmm(&section.end_at) else {
            continue;
        };
        if !contains(start_min, end_min, t_min) {
            continue;
        }
        let dist = distance_from_start(start_min, t_min);
        if best.is_none_or(|(_, best_dist)| dist < best_dist) {
            best = Some((section, dist));
        }
    }
    best.map(|(section, _)| section.id.clone())
}

/// First containing section in list order. The display timeline groups rows
/// with this lookup; it deliberately does not tie-break like
/// [`assign_section`] does.
pub fn find_section_for_minute(sections: &[Section], t_min: u32) -> Option<String> {
    for section in sections {
        let (Some(start_min), Some(end_min)) =
            (parse_hhmm(&section.start_at), parse_hhmm(&section.end_at))
        else {
            continue;
        };
        if contains(start_min, end_min, t_min) {
            return Some(section.id.clone());
        }
    }
    None
}
