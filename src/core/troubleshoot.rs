//! Known failure strings from docker, pip/uv, singularity, skopeo and trivy,
//! mapped to what usually fixes them.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug)]
pub struct Symptom {
    pub id: &'static str,
    pub title: &'static str,
    pub remedy: &'static str,
    pattern: &'static str,
}

const SYMPTOMS: &[Symptom] = &[
    Symptom {
        id: "externally-managed",
        title: "Installer refuses to touch the system Python",
        remedy: "Set PIP_BREAK_SYSTEM_PACKAGES=1 (pip) or UV_SYSTEM_PYTHON=1 and \
                 UV_BREAK_SYSTEM_PACKAGES=1 (uv) in the image, or install into a venv",
        pattern: r"(?i)externally[- ]managed[- ]environment",
    },
    Symptom {
        id: "python-headers",
        title: "C extension build cannot find Python.h",
        remedy: "Install python3-dev and build-essential in the image before installing packages",
        pattern: r"Python\.h: No such file or directory",
    },
    Symptom {
        id: "docker-daemon-down",
        title: "Docker daemon is not reachable",
        remedy: "Start the daemon (systemctl start docker) and check DOCKER_HOST",
        pattern: r"(?i)cannot connect to the docker daemon",
    },
    Symptom {
        id: "docker-socket-permission",
        title: "No permission on the Docker socket",
        remedy: "Add your user to the docker group (usermod -aG docker $USER) and log in again",
        pattern: r"(?i)permission denied while trying to connect to the docker daemon socket",
    },
    Symptom {
        id: "git-missing",
        title: "git is not installed inside the image",
        remedy: "Install git in the image; it is needed for git+ package sources",
        pattern: r"(?i)(cannot find command 'git'|git: not found|no such file or directory: 'git')",
    },
    Symptom {
        id: "no-distribution",
        title: "Package or version not found on the index",
        remedy: "Check the package name and version constraint, and that the base image's Python \
                 version is supported by the release",
        pattern: r"(?i)(no matching distribution found for|no solution found when resolving)",
    },
    Symptom {
        id: "singularity-privileges",
        title: "Singularity build lacks privileges",
        remedy: "Build with --fakeroot, run as root, or use apptainer with user namespaces enabled",
        pattern: r"(?i)FATAL:.*(fakeroot|permission denied|must be root|unprivileged)",
    },
    Symptom {
        id: "disk-full",
        title: "Out of disk space",
        remedy: "Prune unused images (docker system prune) or point SINGULARITY_TMPDIR/TMPDIR at a \
                 larger volume",
        pattern: r"(?i)no space left on device",
    },
    Symptom {
        id: "image-not-found",
        title: "Image does not exist or access is denied",
        remedy: "Check the image name and tag, and log in to the registry if it is private",
        pattern: r"(?i)(manifest unknown|requested access to the resource is denied|repository does not exist)",
    },
    Symptom {
        id: "rate-limited",
        title: "Registry rate limit reached",
        remedy: "Authenticate to Docker Hub or wait before pulling more images",
        pattern: r"(?i)(toomanyrequests|rate limit)",
    },
];

fn compiled() -> &'static [(Regex, &'static Symptom)] {
    static TABLE: OnceLock<Vec<(Regex, &'static Symptom)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        SYMPTOMS
            .iter()
            .filter_map(|s| Regex::new(s.pattern).ok().map(|re| (re, s)))
            .collect()
    })
}

pub fn symptoms() -> &'static [Symptom] {
    SYMPTOMS
}

/// Every symptom whose pattern occurs in `text`, in table order.
pub fn diagnose(text: &str) -> Vec<&'static Symptom> {
    compiled()
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, s)| *s)
        .collect()
}
