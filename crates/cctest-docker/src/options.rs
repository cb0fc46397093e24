//! Fluent construction of `docker run` arguments.

use std::path::{Path, PathBuf};

use cctest_common::types::ContainerName;

/// Flags and command line for one `docker run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    name: ContainerName,
    image: String,
    remove: bool,
    detach: bool,
    interactive: bool,
    tty: bool,
    runtime: Option<String>,
    user: Option<String>,
    groups: Vec<String>,
    devices: Vec<PathBuf>,
    command: Vec<String>,
}

impl RunOptions {
    /// Starts options for a container named `name` running `image`.
    #[must_use]
    pub fn new(name: ContainerName, image: impl Into<String>) -> Self {
        Self {
            name,
            image: image.into(),
            remove: false,
            detach: false,
            interactive: false,
            tty: false,
            runtime: None,
            user: None,
            groups: Vec::new(),
            devices: Vec::new(),
            command: Vec::new(),
        }
    }

    /// Removes the container when it exits (`--rm`).
    #[must_use]
    pub const fn remove(mut self, remove: bool) -> Self {
        self.remove = remove;
        self
    }

    /// Runs in the background (`-d`).
    #[must_use]
    pub const fn detach(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }

    /// Keeps stdin open (`-i`).
    #[must_use]
    pub const fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Allocates a pseudo-TTY (`-t`).
    #[must_use]
    pub const fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Selects an OCI runtime (`--runtime`).
    #[must_use]
    pub fn runtime(mut self, runtime: Option<String>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Runs as `user`, `user:group` or `:group` (`-u`). Empty means default.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        let user = user.into();
        self.user = (!user.is_empty()).then_some(user);
        self
    }

    /// Adds a supplementary group (`--group-add`).
    #[must_use]
    pub fn group_add(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Attaches a host device (`--device`).
    #[must_use]
    pub fn device(mut self, device: impl Into<PathBuf>) -> Self {
        self.devices.push(device.into());
        self
    }

    /// Sets the command run inside the container.
    #[must_use]
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Shorthand for `sh -c <script>`.
    #[must_use]
    pub fn shell(self, script: impl Into<String>) -> Self {
        self.command(["sh".to_string(), "-c".to_string(), script.into()])
    }

    /// Container name.
    #[must_use]
    pub const fn name(&self) -> &ContainerName {
        &self.name
    }

    /// Attached devices, in order.
    #[must_use]
    pub fn devices(&self) -> &[PathBuf] {
        &self.devices
    }

    /// Renders the full argument list, starting with `run`.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--name".to_string(),
            self.name.to_string(),
        ];
        if self.remove {
            args.push("--rm".into());
        }

        let mut short = String::new();
        for (set, flag) in [(self.detach, 'd'), (self.interactive, 'i'), (self.tty, 't')] {
            if set {
                short.push(flag);
            }
        }
        if !short.is_empty() {
            args.push(format!("-{short}"));
        }

        if let Some(runtime) = &self.runtime {
            args.extend(["--runtime".to_string(), runtime.clone()]);
        }
        if let Some(user) = &self.user {
            args.extend(["-u".to_string(), user.clone()]);
        }
        for group in &self.groups {
            args.extend(["--group-add".to_string(), group.clone()]);
        }
        for device in &self.devices {
            args.extend(["--device".to_string(), display(device)]);
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> ContainerName {
        ContainerName::new("c1")
    }

    #[test]
    fn minimal_run_has_name_image_and_command() {
        let args = RunOptions::new(name(), "busybox").shell("exit 15").to_args();
        assert_eq!(
            args,
            vec!["run", "--name", "c1", "busybox", "sh", "-c", "exit 15"]
        );
    }

    #[test]
    fn short_flags_are_combined() {
        let args = RunOptions::new(name(), "busybox")
            .detach(true)
            .interactive(true)
            .tty(true)
            .command(["sh"])
            .to_args();
        assert_eq!(args, vec!["run", "--name", "c1", "-dit", "busybox", "sh"]);

        let args = RunOptions::new(name(), "busybox")
            .detach(true)
            .interactive(true)
            .to_args();
        assert!(args.contains(&"-di".to_string()));
    }

    #[test]
    fn devices_and_groups_repeat_their_flag() {
        let args = RunOptions::new(name(), "busybox")
            .remove(true)
            .group_add("cdrom")
            .group_add("audio")
            .device("/dev/loop0")
            .device("/dev/loop1")
            .command(["stat", "/dev/loop0", "/dev/loop1"])
            .to_args();
        assert_eq!(
            args,
            vec![
                "run",
                "--name",
                "c1",
                "--rm",
                "--group-add",
                "cdrom",
                "--group-add",
                "audio",
                "--device",
                "/dev/loop0",
                "--device",
                "/dev/loop1",
                "busybox",
                "stat",
                "/dev/loop0",
                "/dev/loop1",
            ]
        );
    }

    #[test]
    fn empty_user_is_omitted() {
        let args = RunOptions::new(name(), "postgres").user("").command(["id"]).to_args();
        assert!(!args.contains(&"-u".to_string()));

        let args = RunOptions::new(name(), "postgres")
            .user(":postgres")
            .command(["id"])
            .to_args();
        let pos = args.iter().position(|a| a == "-u").expect("-u present");
        assert_eq!(args[pos + 1], ":postgres");
    }

    #[test]
    fn runtime_precedes_image() {
        let args = RunOptions::new(name(), "busybox")
            .runtime(Some("cc-runtime".into()))
            .command(["true"])
            .to_args();
        let runtime = args.iter().position(|a| a == "--runtime").expect("flag");
        let image = args.iter().position(|a| a == "busybox").expect("image");
        assert!(runtime < image);
        assert_eq!(args[runtime + 1], "cc-runtime");
    }
}
