use std::fs;
use std::io;
use std::path::Path;

/// The 80-class COCO label table most off-the-shelf detector exports use.
/// Serves as the default when no `LABELS_PATH` is configured.
pub const COCO_LABELS: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

pub fn default_labels() -> Vec<String> {
    COCO_LABELS.iter().map(|s| s.to_string()).collect()
}

/// Loads a newline-delimited label file, one class name per line.
/// Blank lines are skipped so trailing newlines do not shift indices.
pub fn load_labels(path: &Path) -> io::Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    let labels: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    if labels.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("label file {} contains no labels", path.display()),
        ));
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_table_has_80_entries() {
        let labels = default_labels();
        assert_eq!(labels.len(), 80);
        assert_eq!(labels[0], "person");
        assert_eq!(labels[16], "dog");
        assert_eq!(labels[79], "toothbrush");
    }

    #[test]
    fn label_file_loads_in_order_and_skips_blanks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cat\ndog\n\nbird\n").unwrap();

        let labels = load_labels(file.path()).unwrap();
        assert_eq!(labels, vec!["cat", "dog", "bird"]);
    }

    #[test]
    fn empty_label_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(load_labels(file.path()).is_err());
    }
}
