//! ICY metadata parsing
//!
//! Pure functions over raw metadata blocks, plus the artist/song split used
//! for display.

/// Title split into artist and song for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongTitle {
    pub artist: String,
    pub song: String,
}

impl SongTitle {
    /// Split a stream title on the first ` - ` separator.
    ///
    /// "Artist - Song" gives artist="Artist", song="Song". Without a separator
    /// the whole string is the artist and the song is empty.
    pub fn parse(title: &str) -> Self {
        match title.split_once(" - ") {
            Some((artist, song)) => Self {
                artist: artist.trim().to_string(),
                song: song.trim().to_string(),
            },
            None => Self {
                artist: title.trim().to_string(),
                song: String::new(),
            },
        }
    }
}

/// Split metadata text into its `key='value';` fields, in order.
///
/// Values end at the first `';` so titles may contain single quotes and
/// semicolons. A trailing field without its terminator is still returned if
/// its closing quote is the last character of the text.
pub fn parse_icy_fields(text: &str) -> Vec<(&str, &str)> {
    let mut fields = Vec::new();
    let mut rest = text;

    while let Some(eq) = rest.find("='") {
        let key = rest[..eq].rsplit(';').next().unwrap_or_default().trim();
        let after = &rest[eq + 2..];
        let (value, next) = match after.find("';") {
            Some(end) => (&after[..end], &after[end + 2..]),
            None => match after.strip_suffix('\'') {
                Some(value) => (value, ""),
                None => break,
            },
        };
        if !key.is_empty() {
            fields.push((key, value));
        }
        rest = next;
    }

    fields
}

/// Extract the `StreamTitle` value from metadata text.
///
/// ICY metadata format: `StreamTitle='Artist - Song';StreamUrl='...';`.
/// Blank titles are treated as absent.
pub fn parse_icy_metadata(metadata: &str) -> Option<String> {
    let (_, title) = parse_icy_fields(metadata)
        .into_iter()
        .find(|(key, _)| *key == "StreamTitle")?;
    let title = title.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Extract the stream title from a raw metadata block.
///
/// Blocks are padded with NUL bytes (some servers use spaces) up to a
/// multiple of 16 bytes. The padding is stripped before decoding as UTF-8.
pub fn extract_icy_title(raw_block: &[u8]) -> Option<String> {
    let end = raw_block
        .iter()
        .rposition(|&b| b != 0 && b != b' ')
        .map(|p| p + 1)
        .unwrap_or(0);
    if end == 0 {
        return None;
    }

    let meta_str = String::from_utf8_lossy(&raw_block[..end]);
    parse_icy_metadata(&meta_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- SongTitle ---

    #[test]
    fn song_title_with_separator() {
        let t = SongTitle::parse("Pink Floyd - Comfortably Numb");
        assert_eq!(t.artist, "Pink Floyd");
        assert_eq!(t.song, "Comfortably Numb");
    }

    #[test]
    fn song_title_without_separator_is_all_artist() {
        let t = SongTitle::parse("Station Jingle");
        assert_eq!(t.artist, "Station Jingle");
        assert_eq!(t.song, "");
    }

    #[test]
    fn song_title_splits_on_first_separator_only() {
        let t = SongTitle::parse("A - B - C");
        assert_eq!(t.artist, "A");
        assert_eq!(t.song, "B - C");
    }

    #[test]
    fn song_title_dash_without_spaces_does_not_split() {
        let t = SongTitle::parse("Artist-Title");
        assert_eq!(t.artist, "Artist-Title");
        assert_eq!(t.song, "");
    }

    #[test]
    fn song_title_unicode() {
        let t = SongTitle::parse("ΠΑΝΟΣ ΚΙΑΜΟΣ - ΘΑ ΜΕ ΖΗΤΑΣ - 2022");
        assert_eq!(t.artist, "ΠΑΝΟΣ ΚΙΑΜΟΣ");
        assert_eq!(t.song, "ΘΑ ΜΕ ΖΗΤΑΣ - 2022");
    }

    // --- parse_icy_fields ---

    #[test]
    fn fields_in_order() {
        let fields = parse_icy_fields("StreamTitle='Song';StreamUrl='http://x';");
        assert_eq!(fields, vec![("StreamTitle", "Song"), ("StreamUrl", "http://x")]);
    }

    #[test]
    fn fields_value_may_contain_quote_and_semicolon() {
        let fields = parse_icy_fields("StreamTitle='It's; fine';");
        assert_eq!(fields, vec![("StreamTitle", "It's; fine")]);
    }

    #[test]
    fn fields_unterminated_value_is_dropped() {
        assert!(parse_icy_fields("StreamTitle='No Closing Quote").is_empty());
    }

    #[test]
    fn fields_final_terminator_optional() {
        let fields = parse_icy_fields("StreamTitle='Song'");
        assert_eq!(fields, vec![("StreamTitle", "Song")]);
    }

    // --- parse_icy_metadata ---

    #[test]
    fn parse_standard_icy_metadata() {
        let raw = "StreamTitle='A - B';";
        assert_eq!(parse_icy_metadata(raw), Some("A - B".to_string()));
    }

    #[test]
    fn parse_icy_metadata_with_url_first() {
        let raw = "StreamUrl='http://example.com';StreamTitle='Song Name';";
        assert_eq!(parse_icy_metadata(raw), Some("Song Name".to_string()));
    }

    #[test]
    fn parse_icy_metadata_empty_title() {
        assert_eq!(parse_icy_metadata("StreamTitle='';StreamUrl='';"), None);
        assert_eq!(parse_icy_metadata("StreamTitle='   ';"), None);
    }

    #[test]
    fn parse_icy_metadata_no_stream_title() {
        assert_eq!(parse_icy_metadata("SomeOtherField='value';"), None);
    }

    #[test]
    fn parse_icy_metadata_multiple_stream_titles_takes_first() {
        let raw = "StreamTitle='First';StreamTitle='Second';";
        assert_eq!(parse_icy_metadata(raw), Some("First".to_string()));
    }

    // --- extract_icy_title ---

    #[test]
    fn extract_from_null_padded_block() {
        let mut block = b"StreamTitle='Test Song';".to_vec();
        block.resize(48, 0);
        assert_eq!(extract_icy_title(&block), Some("Test Song".to_string()));
    }

    #[test]
    fn extract_from_space_padded_block() {
        let mut block = b"StreamTitle='Spaced';".to_vec();
        block.resize(32, b' ');
        assert_eq!(extract_icy_title(&block), Some("Spaced".to_string()));
    }

    #[test]
    fn extract_from_padding_only_block() {
        assert_eq!(extract_icy_title(&[0u8; 32]), None);
        assert_eq!(extract_icy_title(&[]), None);
    }

    #[test]
    fn extract_from_exact_16_byte_block() {
        let block = b"StreamTitle='A';".to_vec();
        assert_eq!(block.len(), 16);
        assert_eq!(extract_icy_title(&block), Some("A".to_string()));
    }

    #[test]
    fn extract_from_non_utf8_block() {
        let mut block = vec![0xFF, 0xFE, b';'];
        block.extend_from_slice(b"StreamTitle='Fallback';");
        block.resize(48, 0);
        assert_eq!(extract_icy_title(&block), Some("Fallback".to_string()));
    }
}
