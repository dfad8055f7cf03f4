//! Resource value types for the imagesmith compute driver.
//!
//! Plain data describing images, disks, instance launch configurations,
//! Windows password resets and OS-login profiles, as they cross the driver
//! boundary. No I/O happens here.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod disk;
pub mod error;
pub mod image;
pub mod instance;
pub mod oslogin;
pub mod windows;

pub use disk::{AttachmentMode, BlockDevice, Disk, InterfaceType, DEFAULT_DISK_TYPE};
pub use error::CoreError;
pub use image::{CreateImageRequest, CustomerEncryptionKey, GuestOsFeature, Image, ImageSelfLink};
pub use instance::{merge_metadata, InstanceConfig, InstanceState, STARTUP_SCRIPT_KEY};
pub use oslogin::{posix_username_for, LoginProfile, PosixAccount, SshPublicKey};
pub use windows::{WindowsPasswordConfig, WINDOWS_KEYS_METADATA_KEY};
