pub const KB: u64 = 1 << 10;
pub const MB: u64 = 1 << 20;
pub const GB: u64 = 1 << 30;

pub struct FormattedSize {
    pub size: u64,
}

impl std::fmt::Display for FormattedSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.size == u64::MAX {
            return write!(f, "unlimited");
        }
        let size = self.size as f64;
        if self.size < KB {
            write!(f, "{}B", self.size)
        } else if self.size < MB {
            write!(f, "{:.2}KB", size / KB as f64)
        } else if self.size < GB {
            write!(f, "{:.2}MB", size / MB as f64)
        } else {
            write!(f, "{:.2}GB", size / GB as f64)
        }
    }
}

pub fn formatted_size(size: u64) -> FormattedSize {
    FormattedSize { size }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(formatted_size(512).to_string(), "512B");
        assert_eq!(formatted_size(1536).to_string(), "1.50KB");
        assert_eq!(formatted_size(4 * MB).to_string(), "4.00MB");
        assert_eq!(formatted_size(3 * GB + GB / 4).to_string(), "3.25GB");
        assert_eq!(formatted_size(u64::MAX).to_string(), "unlimited");
    }
}
