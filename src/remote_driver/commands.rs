//! Command templates the remote backend sends to the elevated shell.
//!
//! Templates use `{placeholder}` markers. Every substituted value is quoted
//! with `shell-escape`, so names and paths never break out of their
//! argument. Operations whose template is `None` are reported as
//! unsupported.

use shell_escape::unix::escape;

use crate::driver::InstanceSpec;

/// Command templates for one partition manager.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSet {
    /// Prints one instance name per line.
    pub list: String,
    /// Prints the status word of `{name}`.
    pub status: String,
    /// Defines `{name}` with `{vcpus}`, `{memory_mb}` and `{root_gb}`.
    pub create: String,
    /// Writes the uploaded `{image_path}` onto the disk of `{name}`.
    pub deploy_image: String,
    /// Powers `{name}` on.
    pub start: String,
    /// Powers `{name}` off immediately.
    pub stop: String,
    /// Restarts `{name}` through the guest.
    pub soft_reboot: String,
    /// Restarts `{name}` immediately.
    pub hard_reboot: String,
    /// Deletes the definition of `{name}`.
    pub destroy: String,
    /// Freezes `{name}`.
    pub pause: Option<String>,
    /// Thaws `{name}`.
    pub unpause: Option<String>,
    /// Saves and stops `{name}`.
    pub suspend: Option<String>,
    /// Restores `{name}`.
    pub resume: Option<String>,
    /// Boots `{name}` from a rescue image.
    pub rescue: Option<String>,
    /// Boots `{name}` from its own disk again.
    pub unrescue: Option<String>,
    /// Copies the disk of `{name}` to `{snapshot}`.
    pub snapshot: String,
    /// Deletes `{path}`.
    pub remove_file: String,
    /// Maps a `{volume_type}` volume to `{name}` at `{mountpoint}`.
    pub attach_volume: String,
    /// Unmaps the volume at `{mountpoint}` from `{name}`.
    pub detach_volume: String,
    /// Prints the console log of `{name}`.
    pub console: String,
    /// Prints a JSON host snapshot for `{node}`.
    pub inventory: String,
    /// Moves `{name}` to `{dest}` while it keeps running.
    pub migrate: String,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            list: String::from("lssyscfg -r lpar -F name"),
            status: String::from("lssyscfg -r lpar --filter lpar_names={name} -F state"),
            create: String::from(
                "mksyscfg -r lpar -i name={name},desired_procs={vcpus},desired_mem={memory_mb} \
                 && mklv -lv lv_{name} rootvg {root_gb}G",
            ),
            deploy_image: String::from("dd if={image_path} of=/dev/rlv_{name} bs=1024k"),
            start: String::from("chsysstate -r lpar -o on -n {name}"),
            stop: String::from("chsysstate -r lpar -o shutdown --immed -n {name}"),
            soft_reboot: String::from("chsysstate -r lpar -o osshutdown --restart -n {name}"),
            hard_reboot: String::from("chsysstate -r lpar -o shutdown --immed --restart -n {name}"),
            destroy: String::from("rmsyscfg -r lpar -n {name} && rmlv -f lv_{name}"),
            pause: None,
            unpause: None,
            suspend: Some(String::from("chsysstate -r lpar -o suspend -n {name}")),
            resume: Some(String::from("chsysstate -r lpar -o resume -n {name}")),
            rescue: None,
            unrescue: None,
            snapshot: String::from("dd if=/dev/rlv_{name} of={snapshot} bs=1024k"),
            remove_file: String::from("rm -f {path}"),
            attach_volume: String::from("mkvdev -vdev {mountpoint} -vadapter vhost_{name}"),
            detach_volume: String::from("rmvdev -vdev {mountpoint}"),
            console: String::from("cat /var/log/lpar/{name}.console"),
            inventory: String::from(
                "printf '{\"node_id\":\"%s\",\"cpu_total\":%s,\"cpu_used\":%s,\
                 \"memory_total_mb\":%s,\"memory_used_mb\":%s,\"disk_total_gb\":%s,\
                 \"disk_used_gb\":%s,\"hypervisor_type\":\"powervm\",\
                 \"hypervisor_version\":\"%s\"}' {node} \
                 $(lshwres -r proc --level sys -F configurable_sys_proc_units,curr_avail_sys_proc_units | awk -F, '{printf \"%d %d\", $1, $1-$2}') \
                 $(lshwres -r mem --level sys -F configurable_sys_mem,curr_avail_sys_mem | awk -F, '{printf \"%d %d\", $1, $1-$2}') \
                 $(lsvg rootvg -field totalpps usedpps -fmt , | awk -F, '{printf \"%d %d\", $1, $2}') \
                 $(ioslevel)",
            ),
            migrate: String::from("migrlpar -o m -t {dest} -p {name}"),
        }
    }
}

/// Substitutes `{key}` markers in `template` with shell-quoted values.
/// Markers without a matching key are left untouched.
///
/// The template is scanned once from left to right; substituted text is
/// never scanned again, so a value containing a marker stays literal.
#[must_use]
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((head, tail)) = rest.split_once('{') {
        rendered.push_str(head);
        let substitution = tail.split_once('}').and_then(|(key, after)| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, after))
        });
        if let Some((value, after)) = substitution {
            rendered.push_str(escape(value.into()).as_ref());
            rest = after;
        } else {
            rendered.push('{');
            rest = tail;
        }
    }
    rendered.push_str(rest);
    rendered
}

/// Placeholders describing an instance.
pub(crate) fn instance_vars(instance: &InstanceSpec) -> [(&'static str, String); 4] {
    [
        ("name", instance.name.clone()),
        ("vcpus", instance.vcpus.to_string()),
        ("memory_mb", instance.memory_mb.to_string()),
        ("root_gb", instance.root_gb.to_string()),
    ]
}

/// Renders `template` for `instance`, adding `extra` placeholders.
pub(crate) fn render_for(template: &str, instance: &InstanceSpec, extra: &[(&str, &str)]) -> String {
    let owned = instance_vars(instance);
    let mut vars: Vec<(&str, &str)> = owned
        .iter()
        .map(|(key, value)| (*key, value.as_str()))
        .collect();
    vars.extend_from_slice(extra);
    render(template, &vars)
}
